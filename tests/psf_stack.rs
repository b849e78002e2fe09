use aberrate::{
    AberrateError, Projection, PsfStack,
    interpolate::{build_layer_layout, interpolate},
};

fn axis_line(label: &str, values: &[f32]) -> String {
    let joined = values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(" ");
    format!("{label}: {joined}\n")
}

/// Synthesize a PSF set with single angle samples. `blur_deg` receives
/// (depth, wavelength, aperture, focus) indices in canonical order.
fn synth_set(
    object_dioptres: &[f32],
    wavelengths: &[f32],
    apertures: &[f32],
    focus_dioptres: &[f32],
    kernel_side: u32,
    blur_deg: impl Fn(usize, usize, usize, usize) -> f32,
) -> (String, Vec<u8>) {
    let mut sidecar = String::new();
    sidecar.push_str(&axis_line("focus_dioptres", focus_dioptres));
    let focus_distances: Vec<f32> = (0..focus_dioptres.len()).map(|i| i as f32 + 0.5).collect();
    sidecar.push_str(&axis_line("focus_distances", &focus_distances));
    sidecar.push_str(&axis_line("object_dioptres", object_dioptres));
    let object_distances: Vec<f32> = (0..object_dioptres.len()).map(|i| i as f32 + 0.25).collect();
    sidecar.push_str(&axis_line("object_distances", &object_distances));
    sidecar.push_str(&axis_line("lambdas", wavelengths));
    sidecar.push_str(&axis_line("apertures", apertures));
    sidecar.push_str(&axis_line("angles_horizontal", &[0.0]));
    sidecar.push_str(&axis_line("angles_vertical", &[0.0]));

    let mut data = Vec::new();
    for d in 0..object_dioptres.len() {
        for w in 0..wavelengths.len() {
            for a in 0..apertures.len() {
                for f in 0..focus_dioptres.len() {
                    // Parameter fields restate grid coordinates.
                    for value in [
                        1.0 / object_dioptres[d],
                        0.0,
                        0.0,
                        wavelengths[w],
                        apertures[a],
                        1.0 / focus_dioptres[f],
                    ] {
                        data.extend_from_slice(&value.to_le_bytes());
                    }
                    data.extend_from_slice(&blur_deg(d, w, a, f).to_le_bytes());
                    data.extend_from_slice(&kernel_side.to_le_bytes());
                    // Column-major payload; an asymmetric ramp catches
                    // transpose mistakes.
                    for i in 0..kernel_side * kernel_side {
                        data.extend_from_slice(&((i % 7 + 1) as f32).to_le_bytes());
                    }
                }
            }
        }
    }
    (sidecar, data)
}

fn projection() -> Projection {
    // Power-of-two ratio: degrees map to pixels exactly (1 deg = 16 px).
    Projection {
        vertical_fov_deg: 8.0,
        vertical_resolution_px: 128,
    }
}

#[test]
fn resampled_kernels_sum_to_one_across_radius_ranges() {
    let (sidecar, data) = synth_set(
        &[1.0, 3.0],
        &[480.0, 550.0, 620.0],
        &[4.0, 6.0],
        &[1.0, 2.0],
        5,
        |d, w, a, f| 0.1 + 0.05 * (d + w + a + f) as f32,
    );
    let mut stack = PsfStack::parse(&sidecar, &data).unwrap();
    stack.resample(projection());

    for psf in stack.psfs() {
        assert!(!psf.weights.is_empty());
        for r in psf.min_blur_radius..=psf.max_blur_radius {
            let sum = psf.kernel_for_radius(r).unwrap().sum();
            assert!((sum - 1.0).abs() < 1e-4, "radius {r}: sum {sum}");
        }
    }
}

#[test]
fn interpolation_at_grid_sample_is_exact() {
    let (sidecar, data) = synth_set(
        &[1.0],
        &[550.0],
        &[4.0, 6.0],
        &[1.0, 2.0],
        3,
        |_, _, a, f| 0.1 + 0.1 * (a * 2 + f) as f32,
    );
    let stack = PsfStack::parse(&sidecar, &data).unwrap();

    // Aperture index 1, focus index 0 -> 0.1 + 0.1 * 2 = 0.3 degrees.
    let (params, _) = interpolate(&stack, 6.0, 1.0, projection());
    assert_eq!(params.len(), 1);
    assert_eq!(params[0].blur_radius_px, projection().degrees_to_pixels(0.3));
}

#[test]
fn midpoint_focus_interpolation_is_arithmetic_mean() {
    let (sidecar, data) = synth_set(
        &[1.0],
        &[550.0],
        &[5.0],
        &[1.0, 2.0],
        3,
        |_, _, _, f| if f == 0 { 0.2 } else { 0.4 },
    );
    let stack = PsfStack::parse(&sidecar, &data).unwrap();

    let (params, _) = interpolate(&stack, 5.0, 1.5, projection());
    let expected = projection().degrees_to_pixels(0.3);
    assert!((params[0].blur_radius_px - expected).abs() < 1e-5);
}

#[test]
fn queries_outside_sampled_range_clamp() {
    let (sidecar, data) = synth_set(
        &[1.0],
        &[550.0],
        &[4.0, 6.0],
        &[1.0, 2.0],
        3,
        |_, _, a, f| 0.1 + 0.1 * (a * 2 + f) as f32,
    );
    let stack = PsfStack::parse(&sidecar, &data).unwrap();

    let (low, _) = interpolate(&stack, 1.0, 0.5, projection());
    assert_eq!(low[0].blur_radius_px, projection().degrees_to_pixels(0.1));
    let (high, _) = interpolate(&stack, 9.0, 9.0, projection());
    assert_eq!(high[0].blur_radius_px, projection().degrees_to_pixels(0.4));
}

#[test]
fn split_inverts_linearize_for_loaded_grid() {
    let (sidecar, data) = synth_set(
        &[1.0, 2.0, 3.0],
        &[480.0, 620.0],
        &[4.0, 6.0],
        &[1.0, 2.0],
        3,
        |_, _, _, _| 0.2,
    );
    let stack = PsfStack::parse(&sidecar, &data).unwrap();
    let shape = stack.shape();
    assert_eq!(shape.len(), 24);
    for linear in 0..shape.len() {
        assert_eq!(shape.linearize(shape.split(linear)), linear);
    }
}

#[test]
fn total_weights_matches_closed_form() {
    // Radii project to exactly 2 and 4 px; every PSF's neighborhood spans
    // both depths, so each holds kernels for radii 2..=4.
    let (sidecar, data) = synth_set(
        &[1.0, 3.0],
        &[550.0],
        &[5.0],
        &[1.0],
        5,
        |d, _, _, _| if d == 0 { 0.125 } else { 0.25 },
    );
    let mut stack = PsfStack::parse(&sidecar, &data).unwrap();
    stack.resample(projection());

    let per_psf: usize = (2..=4u32).map(|r| (2 * r as usize + 1).pow(2)).sum();
    assert_eq!(stack.total_weights(), 2 * per_psf);

    let (params, pool) = stack.flatten_params();
    assert_eq!(pool.len(), stack.total_weights());
    assert_eq!(params[0].min_blur_radius, 2);
    assert_eq!(params[0].max_blur_radius, 4);
    assert_eq!(params[1].weight_start_index as usize, per_psf);
}

#[test]
fn kernel_payload_is_transposed_to_row_major() {
    let (sidecar, mut data) = synth_set(&[1.0], &[550.0], &[5.0], &[1.0], 2, |_, _, _, _| 0.1);
    // Overwrite the 2x2 payload with 1 2 3 4 (column-major).
    let payload_start = data.len() - 4 * 4;
    for (i, v) in [1.0f32, 2.0, 3.0, 4.0].iter().enumerate() {
        data[payload_start + i * 4..payload_start + (i + 1) * 4].copy_from_slice(&v.to_le_bytes());
    }
    let stack = PsfStack::parse(&sidecar, &data).unwrap();
    let psf = &stack.psfs()[0];
    // Column-major (1 2 | 3 4) reads back row-major as (1 3 | 2 4).
    assert_eq!(psf.raw.weights(), &[1.0, 3.0, 2.0, 4.0]);
}

#[test]
fn malformed_inputs_are_rejected() {
    let (sidecar, data) = synth_set(&[1.0], &[550.0], &[5.0], &[1.0], 3, |_, _, _, _| 0.1);

    let unsorted = sidecar.replacen("focus_dioptres: 1", "focus_dioptres: 2 1", 1);
    assert!(matches!(
        PsfStack::parse(&unsorted, &data),
        Err(AberrateError::MalformedDataFile(_))
    ));

    let truncated = &data[..data.len() - 2];
    assert!(matches!(
        PsfStack::parse(&sidecar, truncated),
        Err(AberrateError::MalformedDataFile(_))
    ));

    let mut trailing = data.clone();
    trailing.extend_from_slice(&[0u8; 4]);
    assert!(matches!(
        PsfStack::parse(&sidecar, &trailing),
        Err(AberrateError::MalformedDataFile(_))
    ));

    assert!(matches!(
        PsfStack::parse("only one line\n", &data),
        Err(AberrateError::MalformedDataFile(_))
    ));
}

#[test]
fn load_reads_a_set_directory() {
    let (sidecar, data) = synth_set(&[1.0, 3.0], &[550.0], &[5.0], &[1.0], 3, |_, _, _, _| 0.2);
    let dir = std::env::temp_dir().join(format!("aberrate_set_{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("psfstack"), &sidecar).unwrap();
    std::fs::write(dir.join("psfdata"), &data).unwrap();

    let stack = PsfStack::load(&dir).unwrap();
    assert_eq!(stack.shape().len(), 2);

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn layer_layout_spans_radius_deltas() {
    let (sidecar, data) = synth_set(
        &[1.0, 3.0],
        &[550.0],
        &[5.0],
        &[1.0],
        5,
        |d, _, _, _| if d == 0 { 0.125 } else { 0.25 },
    );
    let mut stack = PsfStack::parse(&sidecar, &data).unwrap();
    stack.resample(projection());

    let (mut params, _) = interpolate(&stack, 5.0, 1.0, projection());
    let layout = build_layer_layout(&mut params, 2, 1);
    // Radii 2 -> 4: two bridging layers plus the trailing one.
    assert_eq!(layout.layer_count(), 3);
    assert_eq!(params[0].start_layer, 0);
    assert_eq!(params[0].num_layers, 2);
    assert_eq!(params[1].start_layer, 2);
    assert_eq!(params[1].num_layers, 1);
    assert_eq!(layout.extent(0), 2);
    assert_eq!(layout.extent(1), 3);
    assert_eq!(layout.extent(2), 4);
}
