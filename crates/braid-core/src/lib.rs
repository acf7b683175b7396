pub mod chunks;
pub mod context;
pub mod execution;
pub mod ids;
pub mod items;
pub mod messages;
pub mod toolcalls;
pub mod tools;
