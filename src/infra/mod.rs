pub mod http_client;
pub mod map_project;
pub mod memory_workspace;

pub use http_client::ReqwestHttp;
pub use map_project::MapProject;
pub use memory_workspace::MemoryWorkspace;
