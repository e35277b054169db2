mod sweep;

pub use sweep::SweepTask;
