pub mod device;
pub mod execution;
pub mod fired_history;
pub mod prefs;
pub mod trigger;
pub mod variable;

pub use device::CalendarDeviceRepository;
pub use execution::TriggerExecutionRepository;
pub use fired_history::FiredTriggerRepository;
pub use prefs::{PluginPrefsRepository, DEBUG_LOGGING_KEY};
pub use trigger::TriggerRuleRepository;
pub use variable::VariableRepository;
