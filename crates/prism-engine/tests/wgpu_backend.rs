//! End-to-end runs on the wgpu backend. Each test skips when no adapter is
//! available.

use prism_engine::device::{Device, DeviceInit, WgpuDevice};
use prism_engine::surface::{
    allocate, encode_rgba16f, SharedSurface, StorageMode, SurfaceAllocationFailure,
    TextureDescriptor, TextureUsage,
};
use prism_engine::{RenderOutput, RenderSession, SessionConfig, SessionError, StrategyKind};

fn session(config: &SessionConfig) -> Option<RenderSession<WgpuDevice>> {
    let init = DeviceInit {
        force_fallback_adapter: std::env::var_os("PRISM_TEST_FALLBACK_ADAPTER").is_some(),
        ..DeviceInit::default()
    };
    match RenderSession::with_wgpu(init, config) {
        Ok(session) => Some(session),
        Err(SessionError::DeviceUnavailable(reason)) => {
            eprintln!("skipping wgpu test: no wgpu adapter available ({reason})");
            None
        }
        Err(other) => panic!("session construction failed: {other}"),
    }
}

fn assert_uniform(surface: &SharedSurface, expected: [f32; 4]) {
    for y in 0..surface.height() {
        for x in 0..surface.width() {
            assert_eq!(surface.read_pixel(x, y), Some(expected), "pixel ({x}, {y})");
        }
    }
}

fn assert_sane_timing(out: &RenderOutput) {
    assert!(out.info.gpu_time.is_finite() && out.info.gpu_time >= 0.0);
    assert!(out.info.kernel_time.is_finite() && out.info.kernel_time >= 0.0);
}

#[test]
fn fill_red_lands_in_surface_with_padded_rows() {
    let Some(session) = session(&SessionConfig::default()) else { return };

    // 101 px rows are 808 bytes; the readback pads them to 1024.
    let out = session
        .submit(StrategyKind::SinglePassFragment, 101, 37, None)
        .unwrap()
        .wait()
        .unwrap();

    assert_eq!(out.surface.bytes_per_row(), 808);
    assert_uniform(&out.surface, [1.0, 0.0, 0.0, 1.0]);
    assert_sane_timing(&out);
}

#[test]
fn compute_covers_extent_that_is_not_a_multiple_of_32() {
    let Some(session) = session(&SessionConfig::default()) else { return };

    let out = session
        .submit(StrategyKind::ComputeDispatch, 100, 70, None)
        .unwrap()
        .wait()
        .unwrap();

    assert_uniform(&out.surface, [0.0, 1.0, 0.0, 1.0]);
    assert_sane_timing(&out);
}

#[test]
fn compute_reads_uploaded_source() {
    let config = SessionConfig {
        compute: vec!["invertSource".to_string()],
        ..SessionConfig::default()
    };
    let Some(session) = session(&config) else { return };

    let desc = TextureDescriptor::new_2d(45, 33, TextureUsage::SHADER_READ, StorageMode::Private);
    let mut data = vec![0u8; desc.bytes_per_row() * desc.height as usize];
    for texel in data.chunks_exact_mut(8) {
        encode_rgba16f([0.25, 0.5, 0.75, 1.0], texel);
    }
    let source = session.device().make_texture_with_data(&desc, &data).unwrap();

    let out = session
        .submit(StrategyKind::ComputeDispatch, 45, 33, Some(&source))
        .unwrap()
        .wait()
        .unwrap();

    assert_uniform(&out.surface, [0.75, 0.5, 0.25, 1.0]);
}

#[test]
fn invalid_texture_is_refused_instead_of_panicking() {
    let Some(session) = session(&SessionConfig::default()) else { return };
    let device = session.device();

    let no_usage = TextureDescriptor::new_2d(4, 4, TextureUsage::empty(), StorageMode::Private);
    assert!(device.make_texture(&no_usage).is_none());

    let max = device.max_texture_dimension();
    let too_wide = TextureDescriptor::new_2d(max + 1, 1, TextureUsage::RENDER_TARGET, StorageMode::Shared);
    assert!(matches!(
        allocate(device, &too_wide),
        Err(SurfaceAllocationFailure::ExceedsDeviceLimit { .. })
    ));

    // The device stays usable afterwards.
    let out = session
        .submit(StrategyKind::SinglePassFragment, 8, 8, None)
        .unwrap()
        .wait()
        .unwrap();
    assert_uniform(&out.surface, [1.0, 0.0, 0.0, 1.0]);
}
