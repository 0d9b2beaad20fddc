mod read;
mod write;

pub(crate) use read::read_features;
pub(crate) use write::{layer_to_geojson, write_to_geojson_bytes};
