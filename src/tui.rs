use crate::{Backend, DisplayError, Paint, Rates, Surface};
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use log::{debug, warn};
use ratatui::{
    backend::CrosstermBackend,
    buffer::Buffer,
    layout::{Constraint, Layout, Rect},
    style::{Color, Stylize},
    symbols::border,
    text::Line,
    widgets::{Block, Widget},
    Frame, Terminal,
};
use std::{
    cell::RefCell,
    io::{self, IsTerminal, Stderr},
    rc::Rc,
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

static HOST_ACTIVE: AtomicBool = AtomicBool::new(false);

/// Fallback sampling grid before a pane has been laid out.
const DEFAULT_GRID: (usize, usize) = (80, 48);

/// Colours sampled from a frame, one per half cell.
#[derive(Debug, Clone, Default)]
struct Image {
    width: usize,
    height: usize,
    pixels: Vec<Color>,
}

impl Image {
    /// Nearest-neighbour sample `paint` down (or up) to `width`x`height`.
    fn sample(paint: &Paint<'_>, width: usize, height: usize) -> Self {
        let frame = &paint.frame;
        if frame.width == 0 || frame.height == 0 || width == 0 || height == 0 {
            return Self::default();
        }
        let mut pixels = Vec::with_capacity(width * height);
        for y in 0..height {
            let sy = y * frame.height / height;
            for x in 0..width {
                let sx = x * frame.width / width;
                let (r, g, b) = paint.colormap.rgb(paint.norm.level(frame.pixel(sx, sy)));
                pixels.push(Color::Rgb(r, g, b));
            }
        }
        Self {
            width,
            height,
            pixels,
        }
    }

    fn at(&self, x: usize, y: usize, width: usize, height: usize) -> Color {
        let sx = x * self.width / width.max(1);
        let sy = y * self.height / height.max(1);
        self.pixels
            .get(sy * self.width + sx)
            .copied()
            .unwrap_or(Color::Reset)
    }
}

#[derive(Debug)]
struct Pane {
    id: usize,
    caption: String,
    image: Image,
    rates: Rates,
    area: Option<Rect>,
    focused: bool,
    closed: bool,
}

impl Widget for &Pane {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let title = Line::from(format!(" {} ", self.caption).bold());
        let rates = Line::from(vec![
            " update ".into(),
            format!("{:.1}", self.rates.update).yellow(),
            " refresh ".into(),
            format!("{:.1}", self.rates.refresh).yellow(),
            " Hz ".into(),
        ]);
        let block = Block::bordered()
            .title(title.centered())
            .title_bottom(rates.centered())
            .border_set(if self.focused {
                border::THICK
            } else {
                border::PLAIN
            });
        let inner = block.inner(area);
        block.render(area, buf);

        if self.image.pixels.is_empty() {
            return;
        }
        let (w, h) = (inner.width as usize, inner.height as usize * 2);
        for row in 0..inner.height {
            for col in 0..inner.width {
                let top = self.image.at(col as usize, row as usize * 2, w, h);
                let bottom = self.image.at(col as usize, row as usize * 2 + 1, w, h);
                if let Some(cell) = buf.cell_mut((inner.x + col, inner.y + row)) {
                    cell.set_char('▀').set_fg(top).set_bg(bottom);
                }
            }
        }
    }
}

/// Owns the terminal and tiles one pane per open surface.
///
/// Draws to stderr so stdout stays free for the renderer protocol. Only one
/// host may exist per process.
pub struct TerminalHost {
    terminal: Terminal<CrosstermBackend<Stderr>>,
    panes: Vec<Pane>,
    next_id: usize,
    quit: bool,
}

impl TerminalHost {
    pub fn open() -> Result<Self, DisplayError> {
        if !io::stderr().is_terminal() {
            return Err(DisplayError::WindowCreation(
                "stderr is not a terminal".to_string(),
            ));
        }
        if HOST_ACTIVE.swap(true, Ordering::SeqCst) {
            return Err(DisplayError::WindowCreation(
                "terminal already in use".to_string(),
            ));
        }
        let terminal = Self::enter().inspect_err(|_| {
            Self::leave();
            HOST_ACTIVE.store(false, Ordering::SeqCst);
        })?;
        Ok(Self {
            terminal,
            panes: Vec::new(),
            next_id: 0,
            quit: false,
        })
    }

    fn enter() -> Result<Terminal<CrosstermBackend<Stderr>>, DisplayError> {
        enable_raw_mode()?;
        execute!(io::stderr(), EnterAlternateScreen)?;
        let mut terminal = Terminal::new(CrosstermBackend::new(io::stderr()))?;
        terminal.hide_cursor()?;
        terminal.clear()?;
        Ok(terminal)
    }

    fn leave() {
        let _ = execute!(io::stderr(), LeaveAlternateScreen);
        let _ = disable_raw_mode();
    }

    fn add_pane(&mut self, caption: &str) -> usize {
        let id = self.next_id;
        self.next_id += 1;
        let focused = self.open_panes().next().is_none();
        self.panes.push(Pane {
            id,
            caption: caption.to_string(),
            image: Image::default(),
            rates: Rates::default(),
            area: None,
            focused,
            closed: false,
        });
        id
    }

    fn pane_mut(&mut self, id: usize) -> Option<&mut Pane> {
        self.panes.iter_mut().find(|p| p.id == id)
    }

    fn open_panes(&self) -> impl Iterator<Item = &Pane> {
        self.panes.iter().filter(|p| !p.closed)
    }

    fn present(&mut self, id: usize, paint: &Paint<'_>) -> Result<(), DisplayError> {
        let Some(pane) = self.pane_mut(id) else {
            return Ok(());
        };
        if pane.closed {
            return Ok(());
        }
        let (w, h) = pane
            .area
            .map(|a| {
                let inner = Block::bordered().inner(a);
                (inner.width as usize, inner.height as usize * 2)
            })
            .unwrap_or(DEFAULT_GRID);
        pane.image = Image::sample(paint, w, h);
        pane.rates = paint.rates;
        self.redraw()
    }

    fn close_pane(&mut self, id: usize) {
        let mut lost_focus = false;
        if let Some(pane) = self.pane_mut(id) {
            lost_focus = pane.focused;
            pane.closed = true;
            pane.focused = false;
        }
        if lost_focus {
            self.focus_next();
        }
        if let Err(e) = self.redraw() {
            debug!("terminal redraw failed: {e}");
        }
    }

    fn is_pane_closed(&mut self, id: usize) -> bool {
        if let Err(e) = self.handle_events() {
            warn!("terminal events: {e}");
        }
        self.quit || self.panes.iter().find(|p| p.id == id).map_or(true, |p| p.closed)
    }

    fn focus_next(&mut self) {
        let open: Vec<usize> = self
            .panes
            .iter()
            .enumerate()
            .filter(|(_, p)| !p.closed)
            .map(|(i, _)| i)
            .collect();
        if open.is_empty() {
            return;
        }
        let current = self.panes.iter().position(|p| p.focused);
        let next = match current.and_then(|c| open.iter().position(|&i| i == c)) {
            Some(pos) => open[(pos + 1) % open.len()],
            None => open[0],
        };
        for (i, pane) in self.panes.iter_mut().enumerate() {
            pane.focused = i == next;
        }
    }

    fn redraw(&mut self) -> Result<(), DisplayError> {
        let mut areas = Vec::new();
        self.terminal.draw(|f| areas = Self::draw(&self.panes, f))?;
        for (id, area) in areas {
            if let Some(pane) = self.pane_mut(id) {
                pane.area = Some(area);
            }
        }
        Ok(())
    }

    fn draw(panes: &[Pane], frame: &mut Frame) -> Vec<(usize, Rect)> {
        let open: Vec<&Pane> = panes.iter().filter(|p| !p.closed).collect();
        if open.is_empty() {
            return Vec::new();
        }
        let areas = Layout::horizontal(vec![Constraint::Fill(1); open.len()]).split(frame.area());
        open.iter()
            .zip(areas.iter())
            .map(|(pane, &area)| {
                frame.render_widget(*pane, area);
                (pane.id, area)
            })
            .collect()
    }

    fn handle_events(&mut self) -> Result<(), DisplayError> {
        while event::poll(Duration::ZERO)? {
            match event::read()? {
                Event::Key(key_event) if key_event.kind == KeyEventKind::Press => {
                    self.handle_key_event(key_event)
                }
                Event::Resize(..) => self.redraw()?,
                _ => {}
            }
        }
        Ok(())
    }

    fn handle_key_event(&mut self, key_event: KeyEvent) {
        match key_event.code {
            KeyCode::Char('q') | KeyCode::Esc => self.quit = true,
            KeyCode::Char('c') if key_event.modifiers.contains(KeyModifiers::CONTROL) => {
                self.quit = true
            }
            KeyCode::Char('c') => {
                if let Some(id) = self.panes.iter().find(|p| p.focused).map(|p| p.id) {
                    self.close_pane(id);
                }
            }
            KeyCode::Tab => {
                self.focus_next();
                if let Err(e) = self.redraw() {
                    debug!("terminal redraw failed: {e}");
                }
            }
            _ => {}
        }
    }
}

impl Drop for TerminalHost {
    fn drop(&mut self) {
        let _ = self.terminal.show_cursor();
        Self::leave();
        HOST_ACTIVE.store(false, Ordering::SeqCst);
    }
}

/// Backend whose windows are panes of one shared [`TerminalHost`].
pub struct TerminalBackend {
    host: Rc<RefCell<TerminalHost>>,
}

impl TerminalBackend {
    pub fn open() -> Result<Self, DisplayError> {
        Ok(Self {
            host: Rc::new(RefCell::new(TerminalHost::open()?)),
        })
    }
}

impl Backend for TerminalBackend {
    fn create_window(&mut self, caption: &str) -> Result<Box<dyn Surface>, DisplayError> {
        let id = self.host.borrow_mut().add_pane(caption);
        Ok(Box::new(TerminalSurface {
            host: Rc::clone(&self.host),
            id,
            caption: caption.to_string(),
        }))
    }
}

pub struct TerminalSurface {
    host: Rc<RefCell<TerminalHost>>,
    id: usize,
    caption: String,
}

impl Surface for TerminalSurface {
    fn caption(&self) -> &str {
        &self.caption
    }

    fn present(&mut self, paint: &Paint<'_>) -> Result<(), DisplayError> {
        self.host.borrow_mut().present(self.id, paint)
    }

    fn is_closed(&mut self) -> bool {
        self.host.borrow_mut().is_pane_closed(self.id)
    }

    fn close(&mut self) {
        self.host.borrow_mut().close_pane(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Colormap, Depth, FrameView, Norm};

    fn paint(data: &[u8], width: usize, height: usize) -> Paint<'_> {
        Paint {
            frame: FrameView {
                width,
                height,
                depth: Depth::U8,
                data,
            },
            norm: Norm {
                min: 0,
                max: 255,
                auto_range: false,
            },
            colormap: Colormap::Grayscale,
            rates: Rates::default(),
        }
    }

    #[test]
    fn sampling_picks_nearest_pixels() {
        let data = [0, 255, 10, 20];
        let image = Image::sample(&paint(&data, 2, 2), 4, 4);
        assert_eq!(image.pixels.len(), 16);
        assert_eq!(image.pixels[0], Color::Rgb(0, 0, 0));
        assert_eq!(image.pixels[3], Color::Rgb(255, 255, 255));
        assert_eq!(image.pixels[15], Color::Rgb(20, 20, 20));
    }

    #[test]
    fn pane_renders_half_blocks() {
        let data = [255, 0];
        let pane = Pane {
            id: 0,
            caption: "pane".to_string(),
            image: Image::sample(&paint(&data, 1, 2), 1, 2),
            rates: Rates::default(),
            area: None,
            focused: true,
            closed: false,
        };
        let area = Rect::new(0, 0, 6, 3);
        let mut buf = Buffer::empty(area);
        (&pane).render(area, &mut buf);
        let cell = buf.cell((1, 1)).unwrap();
        assert_eq!(cell.symbol(), "▀");
        assert_eq!(cell.fg, Color::Rgb(255, 255, 255));
        assert_eq!(cell.bg, Color::Rgb(0, 0, 0));
    }

    #[test]
    fn empty_frame_samples_nothing() {
        let image = Image::sample(&paint(&[], 0, 0), 10, 10);
        assert!(image.pixels.is_empty());
    }
}
