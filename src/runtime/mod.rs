pub mod driver;
pub mod environment;
pub mod message;
pub mod result;
pub mod state;
pub mod strand;
pub mod world;
