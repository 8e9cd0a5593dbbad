//! End-to-end frame test. Requires a Vulkan-capable device and a display,
//! so it is ignored by default: `cargo test -- --ignored` to run it.

use anyhow::Result;
use pyrite::{Context, ContextConfig, DeviceSearchStrategy, Renderer};
use winit::{event_loop::EventLoopBuilder, window::WindowBuilder};

#[test]
#[ignore = "requires a Vulkan-capable device"]
fn renders_one_frame() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "debug".into()),
        )
        .try_init()
        .ok();

    let event_loop = EventLoopBuilder::new().build();
    let window = WindowBuilder::new()
        .with_title("frame test")
        .with_visible(false)
        .build(&event_loop)?;

    let context = Context::new(&window, "Test", "1.0.0", ContextConfig::default())?;
    let mut renderer = Renderer::new(
        &context,
        &window,
        DeviceSearchStrategy::HighestPerformance,
        false,
    )?;

    assert!(!renderer.device().name().is_empty());
    assert_eq!(renderer.swapchain().image_count(), 2);

    renderer.render()?;

    let index = renderer.swapchain().current_image_index()?;
    assert!(index < renderer.swapchain().image_count());

    // A second frame reuses the same command buffer, so recording only
    // succeeds if the first frame's fence wait completed and the pool and
    // buffer resets returned the buffer to a recordable state.
    renderer.render()?;

    let index = renderer.swapchain().current_image_index()?;
    assert!(index < renderer.swapchain().image_count());

    Ok(())
}
