use std::sync::Arc;
use std::thread::{self, JoinHandle};

use anyhow::{anyhow, Result};
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use tracing::{error, info, warn};
use winit::dpi::PhysicalSize;
use winit::event::{Event, WindowEvent};
use winit::event_loop::{ControlFlow, EventLoopBuilder, EventLoopProxy};
use winit::window::{Window, WindowBuilder};

use crate::controller::{BuildFailure, ExecutionController, ExecutionState};
use crate::frame::{FrameClock, FrameHandle};
use crate::gpu::WgpuBackend;
use crate::runtime::SystemTimeSource;

/// Frame clock backed by winit redraw requests.
///
/// Only one callback is outstanding at a time; a `RedrawRequested` event
/// that arrives with nothing pending (an expose, a resize) is not a frame.
pub struct RedrawClock {
    window: Arc<Window>,
    next: u64,
    pending: Option<FrameHandle>,
}

impl RedrawClock {
    pub fn new(window: Arc<Window>) -> Self {
        Self {
            window,
            next: 0,
            pending: None,
        }
    }
}

impl FrameClock for RedrawClock {
    fn request_frame(&mut self) -> FrameHandle {
        self.next += 1;
        let handle = FrameHandle::new(self.next);
        self.pending = Some(handle);
        self.window.request_redraw();
        handle
    }

    fn cancel_frame(&mut self, handle: FrameHandle) {
        if self.pending == Some(handle) {
            self.pending = None;
        }
    }

    fn take_due(&mut self) -> Option<FrameHandle> {
        self.pending.take()
    }
}

#[derive(Debug, Clone)]
pub struct WindowConfig {
    pub title: String,
    pub size: (u32, u32),
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Zenith".to_string(),
            size: (960, 540),
        }
    }
}

/// Outcome reported by the window thread.
///
/// Build outcomes echo the `generation` the source was submitted with, so the
/// caller can tell results for the current request from late ones.
#[derive(Debug, Clone)]
pub enum RenderEvent {
    Running { generation: u64, source: String },
    BuildFailed { generation: u64, failure: BuildFailure },
    Stopped,
    LoopFailed { reason: String },
    Closed,
}

#[derive(Debug, Clone)]
enum WindowCommand {
    Execute { generation: u64, source: String },
    Stop,
    Shutdown,
}

/// Preview window running its event loop and render loop on a dedicated
/// thread. Commands go in through the winit proxy, outcomes come back on
/// [`PreviewWindow::events`].
pub struct PreviewWindow {
    proxy: EventLoopProxy<WindowCommand>,
    events: Receiver<RenderEvent>,
    join_handle: Option<JoinHandle<Result<()>>>,
}

impl PreviewWindow {
    pub fn spawn(config: WindowConfig) -> Result<Self> {
        let (ready_tx, ready_rx) = bounded(1);
        let (event_tx, event_rx) = unbounded();
        let handle = thread::Builder::new()
            .name("zenith-window".into())
            .spawn(move || run_window_thread(config, ready_tx, event_tx))
            .map_err(|err| anyhow!("failed to spawn window thread: {err}"))?;

        let proxy = ready_rx
            .recv()
            .map_err(|err| anyhow!("window thread failed to initialise: {err}"))??;

        Ok(Self {
            proxy,
            events: event_rx,
            join_handle: Some(handle),
        })
    }

    /// Asks the window to build and run `source`. The outcome comes back
    /// tagged with `generation`.
    pub fn execute(&self, generation: u64, source: impl Into<String>) -> Result<()> {
        self.send(WindowCommand::Execute {
            generation,
            source: source.into(),
        })
    }

    pub fn stop(&self) -> Result<()> {
        self.send(WindowCommand::Stop)
    }

    pub fn events(&self) -> &Receiver<RenderEvent> {
        &self.events
    }

    pub fn shutdown(mut self) -> Result<()> {
        if let Some(handle) = self.join_handle.take() {
            let _ = self.proxy.send_event(WindowCommand::Shutdown);
            handle
                .join()
                .map_err(|err| anyhow!("window thread panicked: {err:?}"))??;
        }
        Ok(())
    }

    fn send(&self, command: WindowCommand) -> Result<()> {
        self.proxy
            .send_event(command)
            .map_err(|_| anyhow!("preview window is closed"))
    }
}

impl Drop for PreviewWindow {
    fn drop(&mut self) {
        if let Some(handle) = self.join_handle.take() {
            let _ = self.proxy.send_event(WindowCommand::Shutdown);
            let _ = handle.join();
        }
    }
}

fn window_title(base: &str, state: ExecutionState) -> String {
    format!("{base} [{state}]")
}

fn run_window_thread(
    config: WindowConfig,
    ready_tx: Sender<Result<EventLoopProxy<WindowCommand>, anyhow::Error>>,
    event_tx: Sender<RenderEvent>,
) -> Result<()> {
    let mut builder = EventLoopBuilder::<WindowCommand>::with_user_event();
    #[cfg(any(target_os = "linux", target_os = "android"))]
    {
        use winit::platform::wayland::EventLoopBuilderExtWayland;
        EventLoopBuilderExtWayland::with_any_thread(&mut builder, true);
    }

    #[cfg(any(
        target_os = "freebsd",
        target_os = "openbsd",
        target_os = "netbsd",
        target_os = "dragonfly"
    ))]
    {
        use winit::platform::x11::EventLoopBuilderExtX11;
        EventLoopBuilderExtX11::with_any_thread(&mut builder, true);
    }
    let event_loop = match builder.build() {
        Ok(event_loop) => event_loop,
        Err(err) => {
            let message = format!("failed to create event loop: {err}");
            let _ = ready_tx.send(Err(anyhow!(message.clone())));
            return Err(anyhow!(message));
        }
    };
    let proxy = event_loop.create_proxy();

    let window = WindowBuilder::new()
        .with_title(window_title(&config.title, ExecutionState::Idle))
        .with_inner_size(PhysicalSize::new(config.size.0, config.size.1))
        .build(&event_loop);
    let window = match window {
        Ok(window) => Arc::new(window),
        Err(err) => {
            let message = format!("failed to create preview window: {err}");
            let _ = ready_tx.send(Err(anyhow!(message.clone())));
            return Err(anyhow!(message));
        }
    };

    let backend = match WgpuBackend::new(window.clone()) {
        Ok(backend) => backend,
        Err(err) => {
            let wrapped = anyhow!("failed to initialise window renderer: {err}");
            let message = wrapped.to_string();
            let _ = ready_tx.send(Err(anyhow!(message)));
            return Err(wrapped);
        }
    };
    let mut controller = ExecutionController::new(
        backend,
        RedrawClock::new(window.clone()),
        Box::new(SystemTimeSource::new()),
    );

    let _ = ready_tx.send(Ok(proxy));
    info!(width = config.size.0, height = config.size.1, "preview window ready");

    let run_result = event_loop.run(move |event, elwt| {
        elwt.set_control_flow(ControlFlow::Wait);
        match event {
            Event::UserEvent(command) => {
                match command {
                    WindowCommand::Execute { generation, source } => {
                        match controller.execute(&source) {
                            Ok(()) => {
                                let _ = event_tx.send(RenderEvent::Running { generation, source });
                            }
                            Err(_) => {
                                if let Some(failure) = controller.last_failure() {
                                    let _ = event_tx.send(RenderEvent::BuildFailed {
                                        generation,
                                        failure: failure.clone(),
                                    });
                                }
                            }
                        }
                    }
                    WindowCommand::Stop => {
                        controller.stop();
                        let _ = event_tx.send(RenderEvent::Stopped);
                    }
                    WindowCommand::Shutdown => {
                        controller.teardown();
                        elwt.exit();
                    }
                }
                window.set_title(&window_title(&config.title, controller.state()));
            }
            Event::WindowEvent { window_id, event } if window_id == window.id() => match event {
                WindowEvent::CloseRequested | WindowEvent::Destroyed => {
                    controller.teardown();
                    let _ = event_tx.send(RenderEvent::Closed);
                    elwt.exit();
                }
                WindowEvent::Resized(_) => {
                    window.request_redraw();
                }
                WindowEvent::RedrawRequested => {
                    if let Err(err) = controller.on_redraw() {
                        error!(error = %err, "render loop failed");
                        let _ = event_tx.send(RenderEvent::LoopFailed {
                            reason: err.to_string(),
                        });
                        window.set_title(&window_title(&config.title, controller.state()));
                    }
                }
                _ => {}
            },
            Event::LoopExiting => {
                controller.teardown();
            }
            _ => {}
        }
    });

    run_result.map_err(|err| {
        warn!(error = %err, "window event loop ended with an error");
        anyhow!("window event loop error: {err}")
    })
}
