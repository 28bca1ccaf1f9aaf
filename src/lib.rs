//! Multivariate statistical analysis over image stacks.
//!
//! The crate turns a stack of 2D/3D images into a basis (mean image plus
//! `K` component images) and can project every image of the stack into
//! that basis while holding at most one chunk of vectorized images in
//! memory.
//!
//! ```rust
//! use std::path::Path;
//! use stackmsa::{run, Image, ImageStore, MemoryStore, Mode, MsaConfig};
//!
//! let mut store = MemoryStore::new();
//! for i in 0..12 {
//!     let values = (0..16).map(|p| ((p * (i + 1)) % 7) as f32).collect();
//!     let image = Image::from_vec(4, 4, 1, values).unwrap();
//!     store.write(Path::new("particles"), i, &image).unwrap();
//! }
//!
//! let config = MsaConfig::new().mode(Mode::Pca).n_basis(3);
//! let report = run(&mut store, &config, Path::new("particles"), Path::new("basis"), None).unwrap();
//! assert_eq!(report.basis_images, 4);
//! ```

pub use ndarray::{Array1, Array2, ArrayView1, ArrayView2};

pub mod alignment;
pub mod basis;
pub mod config;
pub mod decomposition;
pub mod error;
pub mod image;
pub mod linalg;
pub mod mask;
pub mod pipeline;
pub mod preprocessing;
pub mod range;
pub mod reproject;
pub mod vectorize;

pub type Vector = Array1<f64>;
pub type Matrix = Array2<f64>;

pub use alignment::SimilarityMatrix;
pub use basis::write_basis;
pub use config::{Mode, MsaConfig};
pub use decomposition::{Decomposition, FastIca, LatentDirichlet, Pca};
pub use error::{MsaError, Result};
pub use image::store::{FileStore, ImageStore, MemoryStore};
pub use image::transform::Transform2D;
pub use image::Image;
pub use mask::Mask;
pub use pipeline::{run, MsaReport};
pub use preprocessing::{center_and_normalize, positivity_shift};
pub use range::SamplingRange;
pub use reproject::{reproject, ChunkPlan, ReprojectionSummary};
pub use vectorize::{vectorize, vectorize_range};
