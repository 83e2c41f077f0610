mod attempt;

pub use attempt::SqliteAttemptRepository;
