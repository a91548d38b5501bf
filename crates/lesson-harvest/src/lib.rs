//! LessonHarvest — authenticated browser harvesting of course media.

pub mod auth;
pub mod config;
pub mod diagnostics;
pub mod download;
pub mod enumerate;
pub mod intercept;
pub mod navigation;
pub mod renderer;
pub mod resolve;
pub mod run;
pub mod selectors;
pub mod types;

pub use auth::{AuthFailure, AuthOutcome, AuthState, Authenticator};
pub use config::{Credentials, HarvestConfig, Timings};
pub use diagnostics::Diagnostics;
pub use download::{sanitize_title, target_filename, DownloadOrchestrator, ExternalFetcher, Fetcher};
pub use enumerate::{enumerate_items, locate_item, ItemListing};
pub use intercept::{classify, CaptureWindow, NetworkInterceptor};
pub use navigation::Navigator;
pub use renderer::{chromium::ChromiumRenderer, PageDriver, Renderer, ResponseStream};
pub use resolve::resolve_media;
pub use run::Harvester;
pub use selectors::{Locator, SelectorChain, SelectorRegistry};
pub use types::*;
