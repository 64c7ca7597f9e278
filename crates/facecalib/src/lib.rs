#![doc = include_str!(concat!("../", env!("CARGO_PKG_README")))]

#[doc(inline)]
pub use facecalib_pnp as pnp;

#[doc(inline)]
pub use facecalib_nn as nn;

#[doc(inline)]
pub use facecalib_optim as optim;

#[doc(inline)]
pub use facecalib_data as data;
