//! Built-in tool plugins.

pub mod hashcat;
pub mod john;
pub mod nmap;
pub mod timer;

use crate::tasker::ToolRegistry;

/// Registry with every tool this binary ships.
pub fn builtin_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry
        .register(timer::KIND, timer::TimerTooler::factory)
        .register(hashcat::KIND, hashcat::HashcatTooler::factory)
        .register(john::KIND, john::JohnTooler::factory)
        .register(nmap::KIND, nmap::NmapTooler::factory);
    registry
}
