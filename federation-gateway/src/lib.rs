//! A federation gateway core: plans queries spanning several services, executes them with
//! batched key based entity fetches, and stitches the results back into one response.

#![cfg_attr(feature = "failfast", allow(unreachable_code))]
#![warn(unreachable_pub)]

macro_rules! failfast_debug {
    ($($tokens:tt)+) => {{
        tracing::debug!($($tokens)+);
        #[cfg(feature = "failfast")]
        panic!(
            "failfast triggered. \
            Please remove the feature failfast if you don't want to see these panics"
        );
    }};
}

macro_rules! failfast_error {
    ($($tokens:tt)+) => {{
        tracing::error!($($tokens)+);
        #[cfg(feature = "failfast")]
        panic!(
            "failfast triggered. \
            Please remove the feature failfast if you don't want to see these panics"
        );
    }};
}

pub mod configuration;
mod context;
pub mod error;
pub mod gateway;
pub mod graphql;
pub mod json_ext;
pub mod query_planner;
pub mod registry;
pub mod services;
pub mod spec;

pub use configuration::Configuration;
pub use context::Context;
pub use gateway::Gateway;
