pub mod api_manager;
