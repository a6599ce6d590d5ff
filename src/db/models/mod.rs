//! Database models split into domain-specific modules.

pub mod audit;
pub mod cart;
pub mod catalog;
pub mod contact;
pub mod customer;
pub mod inventory;
pub mod loyalty;
pub mod order;
pub mod push;
pub mod report;
pub mod user;

pub use audit::*;
pub use cart::*;
pub use catalog::*;
pub use contact::*;
pub use customer::*;
pub use inventory::*;
pub use loyalty::*;
pub use order::*;
pub use push::*;
pub use report::*;
pub use user::*;
