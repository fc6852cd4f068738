pub mod error;
pub mod fanout;
pub mod feed;
pub mod pagination;
pub mod repos;
