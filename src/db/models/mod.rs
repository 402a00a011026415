#![allow(unused_imports)]

//! Database models split into separate files.
//! This module re-exports individual model modules so imports like
//! `use crate::db::models::*;` work.

pub mod push_notification;
pub mod push_subscription;
pub mod wallet_member;

pub use self::push_notification::*;
pub use self::push_subscription::*;
pub use self::wallet_member::*;
