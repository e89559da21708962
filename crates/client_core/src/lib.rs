pub mod backend;
pub mod controller;
pub mod error;
pub mod fragment;
pub mod memory;
pub mod render;
pub mod startup;
pub mod supabase;
pub mod surface;
pub mod view;

pub use backend::{AuthEventStream, BackendResult, BlogBackend, SignUpOutcome, SignUpRequest};
pub use controller::{AppState, BlogController};
pub use error::{ClientError, ValidationError};
pub use memory::MemoryBackend;
pub use render::{escape_html, Feed, PostCard};
pub use startup::{wait_for_backend, Readiness, StartupPolicy};
pub use supabase::{SupabaseBackend, SupabaseConfig};
pub use surface::{AuthTab, FormId, FormMessage, PageSurface};
pub use view::{ViewEffect, ViewState};
