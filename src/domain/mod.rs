pub mod cluster;
pub mod feed;
pub mod item;
pub mod later;
pub mod tag;

pub use cluster::Cluster;
pub use feed::Feed;
pub use item::Item;
pub use later::ReadLater;
pub use tag::Tag;
