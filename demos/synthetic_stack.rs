use stackmsa::{run, FileStore, Image, ImageStore, Mode, MsaConfig};
use std::path::PathBuf;

/// Writes a stack of noisy Gaussian blobs, then computes and projects a PCA basis.
fn main() -> Result<(), Box<dyn std::error::Error>> {
    let dir = std::env::temp_dir().join("stackmsa-demo");
    std::fs::create_dir_all(&dir)?;
    let input: PathBuf = dir.join("blobs.mstk");
    let basis = dir.join("basis.mstk");
    let projection = dir.join("projection.mstk");

    // Step 1: Write 200 32x32 images with a blob that drifts along x
    let mut store = FileStore::new();
    store.discard(&input)?;
    for i in 0..200 {
        let centre = 10.0 + (i % 13) as f32;
        let width = 2.0 + (i % 5) as f32 * 0.5;
        let values = (0..32 * 32)
            .map(|p| {
                let (x, y) = ((p % 32) as f32, (p / 32) as f32);
                let d2 = (x - centre).powi(2) + (y - 16.0).powi(2);
                let noise = ((p * 31 + i * 17) % 23) as f32 / 230.0;
                (-d2 / (2.0 * width * width)).exp() + noise
            })
            .collect();
        store.write(&input, i, &Image::from_vec(32, 32, 1, values)?)?;
    }

    // Step 2: Fit on every other image inside a 14 pixel radius
    let config = MsaConfig::new()
        .mode(Mode::Pca)
        .n_basis(6)
        .mask_radius(14)
        .step("0,2");
    let report = run(&mut store, &config, &input, &basis, Some(&projection))?;

    // Step 3: Inspect the basis
    println!("Fitted {} of {} images, {} pixels each", report.fitted_images, report.total_images, report.active_pixels);
    for i in 1..report.basis_images {
        let image = store.read(&basis, i)?;
        println!(
            "  component {}: eigval {:.3}, explained {:.1}%",
            i,
            image.attr("eigval").unwrap_or(0.0),
            image.attr("explvarfrac").unwrap_or(0.0) * 100.0
        );
    }

    if let Some(summary) = report.reprojection {
        println!(
            "Projected {} images in {} chunk(s) of {}",
            summary.images, summary.chunks, summary.chunk_size
        );
    }

    Ok(())
}
