#![cfg(feature = "test-utils")]

mod commit;
mod pipeline;
mod skip;
mod watches;
