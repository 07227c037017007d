pub mod binaries;
pub mod harness;
pub mod http;
pub mod mock_node;
pub mod process;
pub mod util;
