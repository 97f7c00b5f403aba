// Common test utilities.

pub mod harness;
pub mod mock_upstream;

pub use harness::*;
pub use mock_upstream::*;
