//! padel-core - Core library for Padel Planner
//!
//! This crate contains the shared models, the auth and data collaborator
//! seams, and the client-side state machinery (session store, record
//! collection controller, form state) used by every Padel Planner front end.

pub mod app;
pub mod auth;
pub mod backend;
pub mod config;
pub mod data;
pub mod error;
pub mod form;
pub mod models;
pub mod records;
pub mod session;
pub mod subscription;
pub mod util;

pub use error::{Error, Result};
pub use models::{Identity, MatchRecord, Player, RecordId, Team, TodoRecord};
