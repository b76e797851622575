// Handlers module - the execution target and the runners for action types.

pub mod handler;
pub mod step_host;
