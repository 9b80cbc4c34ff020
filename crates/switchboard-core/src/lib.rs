pub mod assistant;
pub mod capability;
pub mod errors;
pub mod events;
pub mod generator;
pub mod ids;
pub mod messages;
pub mod protocol;
pub mod schema;
