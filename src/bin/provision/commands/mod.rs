pub mod list;
pub mod up;
