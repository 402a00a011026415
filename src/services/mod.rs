pub mod delivery;
pub mod fanout;
pub mod init;
pub mod pruner;
pub mod registry;
