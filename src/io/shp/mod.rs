mod read;
mod rings;
mod write;

pub(crate) use read::read_features;
pub(crate) use write::write_layer;
