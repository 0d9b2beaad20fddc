mod bbox;
mod index;
mod repair;

pub(crate) use index::SpatialIndex;
pub(crate) use repair::{explode, exterior_only, is_vacant, repair, union_all};
