mod write;

pub(crate) use write::write_multipolygon;
