pub(crate) mod dispatch;
pub(crate) mod flatten;
pub(crate) mod identify;
pub(crate) mod import;
pub(crate) mod lifecycle;
pub(crate) mod locks;
pub(crate) mod raster;
pub(crate) mod scoring;
pub(crate) mod storage;
