use std::io::{self, Write};

use crossterm::{
    cursor::MoveTo,
    execute,
    terminal::{self, Clear, ClearType},
};
use tidepool_core::ViewportGeometry;

use crate::connection::Notice;
use crate::fit::ViewportProbe;
use crate::orchestrator::PanelEvent;

/// Where session output is rendered. Emulation is the surface's business;
/// the core only hands it ordered bytes and advisories.
pub trait Surface {
    fn write_output(&mut self, bytes: &[u8]) -> io::Result<()>;

    fn show_notice(&mut self, notice: &Notice) -> io::Result<()>;

    fn clear(&mut self) -> io::Result<()>;

    /// Applies the output-affecting part of a panel event.
    fn apply(&mut self, event: &PanelEvent) -> io::Result<()> {
        match event {
            PanelEvent::Output(bytes) => self.write_output(bytes),
            PanelEvent::Notice(notice) => self.show_notice(notice),
            PanelEvent::AttachFailed { error, .. } => {
                self.show_notice(&Notice::Failure(format!("attach failed: {error}")))
            }
            PanelEvent::ClearScreen => self.clear(),
            PanelEvent::Attached { .. } | PanelEvent::SummaryChanged => Ok(()),
        }
    }
}

/// The local terminal in raw mode. Raw mode is left again on drop.
pub struct TerminalSurface {
    out: io::Stdout,
}

impl TerminalSurface {
    pub fn enter() -> io::Result<Self> {
        terminal::enable_raw_mode()?;
        Ok(Self { out: io::stdout() })
    }
}

impl Surface for TerminalSurface {
    fn write_output(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.out.write_all(bytes)?;
        self.out.flush()
    }

    fn show_notice(&mut self, notice: &Notice) -> io::Result<()> {
        self.write_output(notice.render().as_bytes())
    }

    fn clear(&mut self) -> io::Result<()> {
        execute!(self.out, Clear(ClearType::All), Clear(ClearType::Purge), MoveTo(0, 0))
    }
}

impl Drop for TerminalSurface {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
    }
}

/// Measures the controlling terminal.
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminalProbe;

impl ViewportProbe for TerminalProbe {
    fn measure(&self) -> Option<ViewportGeometry> {
        terminal::size()
            .ok()
            .map(|(cols, rows)| ViewportGeometry::new(cols, rows))
    }
}
