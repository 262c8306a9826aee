use glam::DVec2;

use super::header::Header;
use super::*;

const TOLERANCE: f64 = 1e-6;

/// 64x64 spaxel IFU field at 0.1 arcsec/pixel, reference pixel at the centre.
fn ifu_wcs() -> Wcs {
    Wcs::from_scale_rotation((32.5, 32.5), (150.0, 2.0), 0.1, 0.0, (64, 64)).unwrap()
}

fn cube_header() -> Header {
    Header::new()
        .with("NAXIS", 3i64)
        .with("NAXIS1", 64i64)
        .with("NAXIS2", 60i64)
        .with("NAXIS3", 2048i64)
        .with("CTYPE1", "RA---TAN")
        .with("CTYPE2", "DEC--TAN")
        .with("CTYPE3", "WAVE")
        .with("CUNIT3", "MICRON")
        .with("CRPIX1", 32.0)
        .with("CRPIX2", 30.0)
        .with("CRPIX3", 1.0)
        .with("CRVAL1", 53.16)
        .with("CRVAL2", -27.78)
        .with("CRVAL3", 1.93)
        .with("CD1_1", -0.1 / 3600.0)
        .with("CD1_2", 0.0)
        .with("CD2_1", 0.0)
        .with("CD2_2", 0.1 / 3600.0)
        .with("CD3_3", 0.000245)
}

#[test]
fn test_reference_pixel_maps_to_reference_value() {
    let wcs = ifu_wcs();
    // CRPIX is 1-based, so the 0-based pixel is CRPIX - 1
    let (ra, dec) = wcs.pixel_to_sky(31.5, 31.5);
    assert!((ra - 150.0).abs() < TOLERANCE);
    assert!((dec - 2.0).abs() < TOLERANCE);
}

#[test]
fn test_sky_to_pixel_roundtrip() {
    let wcs = Wcs::from_scale_rotation((512.0, 512.0), (180.0, 45.0), 2.0, 30.0, (1024, 1024))
        .unwrap();

    for (x, y) in [(100.0, 100.0), (511.0, 511.0), (900.0, 700.0)] {
        let (ra, dec) = wcs.pixel_to_sky(x, y);
        let (x2, y2) = wcs.sky_to_pixel(ra, dec);
        assert!((x - x2).abs() < 1e-9, "X mismatch: {} vs {}", x, x2);
        assert!((y - y2).abs() < 1e-9, "Y mismatch: {} vs {}", y, y2);
    }
}

#[test]
fn test_ra_wraps_into_range() {
    let wcs = Wcs::from_scale_rotation((1.0, 1.0), (0.0, 0.0), 1.0, 0.0, (10, 10)).unwrap();
    // RA increases to the left; one pixel right of the reference is just below 360
    let (ra, _) = wcs.pixel_to_sky(1.0, 0.0);
    assert!(ra > 359.0 && ra < 360.0, "RA not wrapped: {}", ra);
}

#[test]
fn test_pixel_scales() {
    let wcs = Wcs::from_scale_rotation((1.0, 1.0), (180.0, 45.0), 1.5, 20.0, (10, 10)).unwrap();
    let scales = wcs.pixel_scales();
    assert_eq!(scales.len(), 2);
    assert!((scales[0] * 3600.0 - 1.5).abs() < 1e-10);
    assert!((scales[1] * 3600.0 - 1.5).abs() < 1e-10);
}

#[test]
fn test_diagonal_scale_arcsec() {
    let wcs = ifu_wcs();
    let scale = wcs.diagonal_scale_arcsec();
    assert!((scale.x - 0.1).abs() < 1e-12);
    assert!((scale.y - 0.1).abs() < 1e-12);
}

#[test]
fn test_singular_matrix_rejected() {
    let result = Wcs::new((1.0, 1.0), (0.0, 0.0), [[1e-5, 2e-5], [2e-5, 4e-5]], (4, 4));
    assert!(matches!(result, Err(WcsError::SingularMatrix { .. })));
}

#[test]
fn test_shifted_returns_copy() {
    let wcs = ifu_wcs();
    let shifted = wcs.shifted(DVec2::new(2.0, -1.5));

    assert_eq!(wcs.crpix(), (32.5, 32.5));
    assert_eq!(shifted.crpix(), (34.5, 31.0));
    assert_eq!(shifted.crval(), wcs.crval());
}

#[test]
fn test_from_header_cube() {
    let header = cube_header();
    let wcs = Wcs::from_header(&header).unwrap();

    assert!(wcs.is_cube());
    assert_eq!(wcs.shape(), &[2048, 60, 64]);
    assert_eq!(wcs.nchan(), 2048);
    assert_eq!(wcs.image_shape(), (60, 64));

    let spectral = wcs.spectral().unwrap();
    assert_eq!(spectral.cunit, "um");
    assert_eq!(spectral.step, Some(0.000245));
    assert!((spectral.pixel_to_world(0.0) - 1.93).abs() < 1e-12);
    assert!((spectral.pixel_to_world(10.0) - (1.93 + 10.0 * 0.000245)).abs() < 1e-12);

    // Caller's header untouched
    assert_eq!(header.get_str("CUNIT3"), Some("MICRON"));
}

#[test]
fn test_from_header_pc_cdelt_fallback() {
    let mut header = cube_header();
    for key in ["CD1_1", "CD1_2", "CD2_1", "CD2_2", "CD3_3"] {
        header.remove(key);
    }
    header.set("CDELT1", -2.0 / 3600.0);
    header.set("CDELT2", 2.0 / 3600.0);
    header.set("PC1_1", 1.0);
    header.set("PC2_2", 1.0);
    header.set("PC3_3", 1.0);
    header.set("CDELT3", 0.0005);

    let wcs = Wcs::from_header(&header).unwrap();
    assert!((wcs.cd()[0][0] + 2.0 / 3600.0).abs() < 1e-15);
    assert!((wcs.cd()[1][1] - 2.0 / 3600.0).abs() < 1e-15);
    assert_eq!(wcs.spectral().unwrap().step, Some(0.0005));
}

#[test]
fn test_from_header_without_spectral_step() {
    let mut header = cube_header();
    header.remove("CD3_3");
    let wcs = Wcs::from_header(&header).unwrap();
    assert_eq!(wcs.spectral().unwrap().step, None);
}

#[test]
fn test_from_header_missing_linear_terms() {
    let mut header = cube_header();
    for key in ["CD1_1", "CD1_2", "CD2_1", "CD2_2"] {
        header.remove(key);
    }
    let err = Wcs::from_header(&header).unwrap_err();
    assert_eq!(
        err,
        WcsError::MissingKeyword {
            keyword: "CD1_1".to_string()
        }
    );
}

#[test]
fn test_from_header_unsupported_axes() {
    let header = cube_header().with("NAXIS", 4i64);
    assert_eq!(
        Wcs::from_header(&header).unwrap_err(),
        WcsError::UnsupportedAxes { naxis: 4 }
    );

    let header = cube_header().with("NAXIS", 1i64);
    assert_eq!(
        Wcs::from_header(&header).unwrap_err(),
        WcsError::UnsupportedAxes { naxis: 1 }
    );
}

#[test]
fn test_from_header_unsupported_projection() {
    let header = cube_header().with("CTYPE1", "RA---SIN");
    assert!(matches!(
        Wcs::from_header(&header),
        Err(WcsError::UnsupportedProjection { .. })
    ));
}

#[test]
fn test_linear_projection() {
    let header = cube_header()
        .with("CTYPE1", "RA")
        .with("CTYPE2", "DEC")
        .with("CRPIX1", 1.0)
        .with("CRPIX2", 1.0);
    let wcs = Wcs::from_header(&header).unwrap();
    assert_eq!(wcs.projection(), Projection::Linear);

    let (ra, dec) = wcs.pixel_to_sky(10.0, 10.0);
    assert!((ra - (53.16 - 1.0 / 3600.0)).abs() < 1e-12);
    assert!((dec - (-27.78 + 1.0 / 3600.0)).abs() < 1e-12);
}

#[test]
fn test_header_roundtrip() {
    let wcs = Wcs::from_header(&cube_header()).unwrap();
    let restored = Wcs::from_header(&wcs.to_header()).unwrap();
    assert_eq!(restored, wcs);

    let image = ifu_wcs();
    let restored = Wcs::from_header(&image.to_header()).unwrap();
    assert_eq!(restored, image);
}

#[test]
fn test_pixel_to_pixel_between_frames() {
    let first = ifu_wcs();
    let second = first.shifted(DVec2::new(3.0, -2.0));

    let converted = pixel_to_pixel(&first, &second, &[10.0, 20.0]);
    assert!((converted[0] - 13.0).abs() < 1e-6);
    assert!((converted[1] - 18.0).abs() < 1e-6);
}

#[test]
fn test_pixel_to_world_cube() {
    let wcs = Wcs::from_header(&cube_header()).unwrap();
    let world = wcs.pixel_to_world(&[31.0, 29.0, 4.0]);
    assert_eq!(world.len(), 3);
    assert!((world[0] - 53.16).abs() < 1e-9);
    assert!((world[1] + 27.78).abs() < 1e-9);

    let pixel = wcs.world_to_pixel(&world);
    assert!((pixel[0] - 31.0).abs() < 1e-6);
    assert!((pixel[1] - 29.0).abs() < 1e-6);
    assert!((pixel[2] - 4.0).abs() < 1e-9);
}

#[test]
fn test_far_side_maps_to_nan() {
    let wcs = ifu_wcs();
    let (x, y) = wcs.sky_to_pixel(330.0, -2.0);
    assert!(x.is_nan() && y.is_nan());
}
