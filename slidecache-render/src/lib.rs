mod encoded;
mod flat;
mod pixcache;
mod worker;

#[cfg(feature = "pdfium")]
mod pdfium;

pub use encoded::EncodedPage;
pub use flat::FlatRenderer;
pub use pixcache::{CacheEvent, PixCache, Region};

#[cfg(feature = "pdfium")]
pub use pdfium::PdfiumRenderer;
