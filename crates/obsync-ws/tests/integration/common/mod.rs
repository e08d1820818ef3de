pub mod json_adapter;
pub mod mock_ws;
