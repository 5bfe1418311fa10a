//! `spotnav` - Live turn-by-turn guidance to a reserved parking spot
//!
//! This library turns a stream of position fixes into route progress,
//! spoken instructions, off-route detection and rerouting, with an optional
//! journal of every guidance session.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod announcer;
pub mod cli;
pub mod config;
pub mod controller;
pub mod error;
pub mod fix;
pub mod geo;
pub mod heading;
pub mod journal;
pub mod logging;
pub mod matcher;
pub mod provider;
pub mod reroute;
pub mod route;
pub mod session;
pub mod source;

pub use announcer::{Announcer, Speaker};
pub use config::Config;
pub use controller::{GuidanceController, GuidanceEvent, NavigationState, NavigationStatus};
pub use error::{Error, Result};
pub use fix::PositionFix;
pub use geo::LatLng;
pub use journal::{Journal, JournalStats};
pub use logging::init_logging;
pub use provider::{RouteError, RouteProvider};
pub use route::{ManeuverKind, Route, RouteSummary, Step};
pub use session::NavigationSession;
pub use source::{PositionError, PositionEvent, PositionSink, PositionSource, PositionStream};
