//! Collaborator handles.
//!
//! A backend is the single handle an application instance creates at start
//! and passes to every component: one auth session, one data client, one set
//! of listener channels.

mod memory;
mod supabase;

use crate::auth::AuthBackend;
use crate::data::DataBackend;

pub use memory::{Gate, MemoryBackend, Operation};
pub use supabase::SupabaseBackend;

/// Both collaborator capability sets behind one handle.
pub trait Backend: AuthBackend + DataBackend {}

impl<T: AuthBackend + DataBackend> Backend for T {}
