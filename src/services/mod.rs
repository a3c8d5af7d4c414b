pub mod calendar;
pub mod evaluator;
pub mod google;
pub mod host;
pub mod init;
pub mod provider;
pub mod runtime;
pub mod scheduler;
pub mod trigger_worker;

#[cfg(test)]
pub mod testing;
