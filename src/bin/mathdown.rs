use std::{
    env,
    fs::File,
    io,
    path::{Path, PathBuf},
    sync::Mutex,
    time::{Duration, Instant},
};

use anyhow::{Context, Result, bail};
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{
    Frame, Terminal,
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Position, Rect},
    style::Style,
    text::{Line, Span, Text},
    widgets::{Block, Borders, Paragraph},
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use mathdown_tui::{
    assemble::RenderItem,
    config::PreviewConfig,
    editor::TextEditor,
    html::export_html,
    io::{SAMPLE_DOCUMENT, load_text, save_text},
    math::{CacheStats, LatexTypesetter, MathRasterizer},
    markup::CmarkConverter,
    pipeline::{RenderMode, RenderOutput, RenderPipeline},
    render::render_preview,
    scheduler::{DisplaySurface, RenderScheduler},
    theme::Theme,
};

const STATUS_TIMEOUT: Duration = Duration::from_secs(4);
const RENDER_POLL: Duration = Duration::from_millis(20);
const TAB_WIDTH: usize = 4;
const USAGE: &str = "Usage: mathdown [--config <file.toml>] [--export-html <out.html>] <file.md>";

struct Args {
    file: PathBuf,
    config: Option<PathBuf>,
    export: Option<PathBuf>,
}

fn parse_args() -> Result<Option<Args>> {
    let mut args = env::args().skip(1);
    let mut file = None;
    let mut config = None;
    let mut export = None;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-h" | "--help" => return Ok(None),
            "--config" => {
                let value = args.next().context("--config needs a path")?;
                config = Some(PathBuf::from(value));
            }
            "--export-html" => {
                let value = args.next().context("--export-html needs an output path")?;
                export = Some(PathBuf::from(value));
            }
            flag if flag.starts_with("--") => bail!("unknown option {flag}"),
            _ if file.is_none() => file = Some(PathBuf::from(arg)),
            _ => bail!("unexpected argument {arg}"),
        }
    }
    Ok(file.map(|file| Args {
        file,
        config,
        export,
    }))
}

fn init_logging() -> Result<()> {
    let Some(path) = env::var_os("MATHDOWN_LOG") else {
        return Ok(());
    };
    let file = File::create(&path)
        .with_context(|| format!("failed to create log file {}", Path::new(&path).display()))?;
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("mathdown_tui=info"));
    // A subscriber may already be installed when embedded; keep that one.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .try_init();
    Ok(())
}

fn load_config(path: Option<&Path>) -> (PreviewConfig, Option<String>) {
    let Some(path) = path.map(Path::to_path_buf).or_else(PreviewConfig::default_path) else {
        return (PreviewConfig::default(), None);
    };
    match PreviewConfig::load_from(&path) {
        Ok(config) => (config, None),
        Err(err) => {
            warn!(%err, "using default configuration");
            (PreviewConfig::default(), Some(format!("{err}; using defaults")))
        }
    }
}

fn build_pipeline(config: &PreviewConfig) -> RenderPipeline {
    let rasterizer = MathRasterizer::new(LatexTypesetter, config.math.clone());
    RenderPipeline::new(CmarkConverter, config.mapping, rasterizer)
}

fn main() -> Result<()> {
    run()
}

fn run() -> Result<()> {
    let Some(args) = parse_args()? else {
        eprintln!("{USAGE}");
        return Ok(());
    };
    init_logging()?;

    let (config, config_status) = load_config(args.config.as_deref());
    let pipeline = build_pipeline(&config);

    if let Some(out) = &args.export {
        return export(&args.file, out, &pipeline);
    }

    let (text, initial_status) = load_document(&args.file)?;
    let initial_status = config_status.or(initial_status);
    let mut app = App::new(text, args.file, pipeline, initial_status);

    enable_raw_mode().context("failed to enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen).context("failed to initialize terminal")?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("failed to create terminal backend")?;
    terminal.clear().ok();

    let res = run_app(&mut terminal, &mut app, config.editor.tick_rate()).context("application error");

    disable_raw_mode().ok();
    execute!(terminal.backend_mut(), LeaveAlternateScreen).ok();
    terminal.show_cursor().ok();

    res
}

fn export(input: &Path, out: &Path, pipeline: &RenderPipeline) -> Result<()> {
    let text = load_text(input)?;
    let title = input
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string());
    let export = export_html(&text, &title, pipeline);
    save_text(out, &export.html)?;
    println!(
        "wrote {} ({} math expressions, {} failed)",
        out.display(),
        export.math,
        export.failures
    );
    Ok(())
}

fn load_document(path: &Path) -> Result<(String, Option<String>)> {
    if path.exists() {
        let text = load_text(path)?;
        Ok((text, None))
    } else {
        info!(path = %path.display(), "starting new document");
        Ok((SAMPLE_DOCUMENT.to_string(), Some("New document".to_string())))
    }
}

fn run_app<B: ratatui::backend::Backend>(
    terminal: &mut Terminal<B>,
    app: &mut App,
    tick_rate: Duration,
) -> Result<()> {
    let mut last_tick = Instant::now();
    let mut needs_redraw = true;

    while !app.should_quit() {
        if app.pump_render() {
            needs_redraw = true;
        }

        if needs_redraw {
            terminal
                .draw(|frame| app.draw(frame))
                .context("failed to draw frame")?;
            needs_redraw = false;
        }

        let mut timeout = tick_rate
            .checked_sub(last_tick.elapsed())
            .unwrap_or_else(|| Duration::from_secs(0));
        if app.render_in_flight() {
            timeout = timeout.min(RENDER_POLL);
        }

        if event::poll(timeout).context("event poll failed")? {
            let evt = event::read().context("failed to read event")?;
            app.handle_event(evt);
            needs_redraw = true;
        }

        if last_tick.elapsed() >= tick_rate {
            let had_message_before = app.has_status_message();
            app.on_tick();
            last_tick = Instant::now();
            if had_message_before && !app.has_status_message() {
                needs_redraw = true;
            }
        }
    }

    Ok(())
}

/// Holds the last published render list for drawing.
#[derive(Default)]
struct PreviewPane {
    items: Vec<RenderItem>,
    diagnostics: usize,
    cache: CacheStats,
}

impl DisplaySurface for PreviewPane {
    fn publish(&mut self, output: RenderOutput) {
        for diagnostic in &output.diagnostics {
            tracing::debug!(%diagnostic, "preview diagnostic");
        }
        self.items = output.items;
        self.diagnostics = output.diagnostics.len();
        self.cache = output.stats.cache;
    }
}

struct App {
    editor: TextEditor,
    scheduler: RenderScheduler<PreviewPane>,
    theme: Theme,
    file_path: PathBuf,
    should_quit: bool,
    dirty: bool,
    status_message: Option<(String, Instant)>,
    editor_scroll: usize,
    preview_scroll: usize,
    last_preview_lines: usize,
    last_viewport_height: usize,
}

impl App {
    fn new(
        text: String,
        path: PathBuf,
        pipeline: RenderPipeline,
        initial_status: Option<String>,
    ) -> Self {
        let scheduler = RenderScheduler::new(pipeline, PreviewPane::default(), text.clone());
        Self {
            editor: TextEditor::new(text),
            scheduler,
            theme: Theme::default(),
            file_path: path,
            should_quit: false,
            dirty: false,
            status_message: initial_status.map(|msg| (msg, Instant::now())),
            editor_scroll: 0,
            preview_scroll: 0,
            last_preview_lines: 0,
            last_viewport_height: 0,
        }
    }

    fn should_quit(&self) -> bool {
        self.should_quit
    }

    fn has_status_message(&self) -> bool {
        self.status_message.is_some()
    }

    fn set_status(&mut self, message: impl Into<String>) {
        self.status_message = Some((message.into(), Instant::now()));
    }

    fn render_in_flight(&self) -> bool {
        self.scheduler.has_pending() || self.scheduler.is_dirty()
    }

    /// Collects a finished pass and starts the next one if needed. Returns
    /// whether the preview changed.
    fn pump_render(&mut self) -> bool {
        let published = self.scheduler.poll_completed();
        self.scheduler.spawn_pending();
        published
    }

    fn draw(&mut self, frame: &mut Frame) {
        let area = frame.area();
        if area.height == 0 || area.width == 0 {
            return;
        }

        let vertical = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Min(1), Constraint::Length(1)])
            .split(area);
        let main_area = vertical[0];
        let status_area = vertical[1];

        let horizontal = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
            .split(main_area);

        self.draw_editor(frame, horizontal[0]);
        self.draw_preview(frame, horizontal[1]);

        let status_line = self.status_line(status_area.width as usize);
        let status_widget = Paragraph::new(status_line)
            .block(Block::default().borders(Borders::NONE))
            .style(self.theme.status_bar_style());
        frame.render_widget(status_widget, status_area);
    }

    fn draw_editor(&mut self, frame: &mut Frame, area: Rect) {
        let block = Block::default()
            .borders(Borders::RIGHT)
            .border_style(self.theme.border_style());
        let inner = block.inner(area);
        let viewport = (inner.height as usize).max(1);

        let cursor = self.editor.cursor_position();
        if cursor.line < self.editor_scroll {
            self.editor_scroll = cursor.line;
        } else if cursor.line >= self.editor_scroll + viewport {
            self.editor_scroll = cursor.line + 1 - viewport;
        }

        let paragraph = Paragraph::new(Text::raw(self.editor.text()))
            .block(block)
            .style(Style::default().bg(self.theme.background))
            .scroll((self.editor_scroll as u16, 0));
        frame.render_widget(paragraph, area);

        if inner.width > 0 {
            let cursor_y = inner.y + (cursor.line - self.editor_scroll) as u16;
            let cursor_x = inner.x + (cursor.column as u16).min(inner.width - 1);
            frame.set_cursor_position(Position::new(cursor_x, cursor_y));
        }
    }

    fn draw_preview(&mut self, frame: &mut Frame, area: Rect) {
        let title = match self.scheduler.mode() {
            RenderMode::Preview => " Preview ",
            RenderMode::RawMarkup => " Raw markup ",
        };
        let block = Block::default()
            .borders(Borders::TOP)
            .border_style(self.theme.border_style())
            .title(title);
        let inner = block.inner(area);
        let render = render_preview(
            &self.scheduler.surface().items,
            inner.width.max(1) as usize,
            &self.theme,
        );

        let viewport = inner.height as usize;
        self.last_viewport_height = viewport;
        self.last_preview_lines = render.total_lines;
        let max_scroll = render.total_lines.saturating_sub(viewport);
        self.preview_scroll = self.preview_scroll.min(max_scroll);

        let paragraph = Paragraph::new(Text::from(render.lines))
            .block(block)
            .style(Style::default().bg(self.theme.background))
            .scroll((self.preview_scroll as u16, 0));
        frame.render_widget(paragraph, area);
    }

    fn status_line(&mut self, terminal_width: usize) -> Line<'static> {
        self.prune_status_message();

        if let Some((message, _)) = &self.status_message {
            return Line::from(vec![Span::raw(format!(" {message}"))]);
        }

        let filename = self.file_path.display().to_string();
        let marker = if self.dirty { "*" } else { "" };
        let pane = self.scheduler.surface();

        // Shortcuts ordered from least to most important (reversed order for display)
        let all_shortcuts = vec!["^N:New", "^R:Raw", "^S:Save", "^Q:Quit"];

        let mut spans = vec![
            Span::raw(" "),
            Span::styled(format!("{filename}{marker}"), self.theme.filename_style()),
            Span::raw(format!(
                ", {} lines, {} math cached, {} hits",
                self.editor.line_count(),
                pane.cache.entries,
                pane.cache.hits
            )),
        ];
        if pane.diagnostics > 0 {
            spans.push(Span::raw(format!(", {} warnings", pane.diagnostics)));
        }
        if self.scheduler.is_dirty() {
            spans.push(Span::raw(" …"));
        }

        let left_width: usize = spans.iter().map(|span| span.content.chars().count()).sum();

        // Fit shortcuts from most to least important, keeping one space of padding
        let min_padding = 1;
        let mut shortcuts_to_show = Vec::new();
        let mut shortcuts_width = 0;
        for shortcut in all_shortcuts.iter().rev() {
            let test_width = if shortcuts_to_show.is_empty() {
                shortcut.chars().count()
            } else {
                shortcuts_width + 1 + shortcut.chars().count()
            };
            if left_width + min_padding + test_width <= terminal_width {
                shortcuts_to_show.insert(0, *shortcut);
                shortcuts_width = test_width;
            } else {
                break;
            }
        }

        if !shortcuts_to_show.is_empty() {
            let padding_needed = terminal_width
                .saturating_sub(left_width)
                .saturating_sub(shortcuts_width)
                .max(min_padding);
            spans.push(Span::raw(" ".repeat(padding_needed)));
            spans.push(Span::raw(shortcuts_to_show.join(" ")));
        }

        Line::from(spans)
    }

    fn prune_status_message(&mut self) {
        if let Some((_, instant)) = &self.status_message
            && instant.elapsed() > STATUS_TIMEOUT
        {
            self.status_message = None;
        }
    }

    fn handle_event(&mut self, event: Event) {
        let Event::Key(KeyEvent {
            code,
            modifiers,
            kind: KeyEventKind::Press,
            ..
        }) = event
        else {
            return;
        };

        let changed = match (code, modifiers) {
            (KeyCode::Char('q') | KeyCode::Char('c'), m) if m.contains(KeyModifiers::CONTROL) => {
                self.should_quit = true;
                false
            }
            (KeyCode::Char('s'), m) if m.contains(KeyModifiers::CONTROL) => {
                self.save();
                false
            }
            (KeyCode::Char('n'), m) if m.contains(KeyModifiers::CONTROL) => {
                self.editor.set_text(String::new());
                self.set_status("New document");
                true
            }
            (KeyCode::Char('r'), m) if m.contains(KeyModifiers::CONTROL) => {
                let mode = self.scheduler.mode().toggled();
                self.scheduler.set_mode(mode);
                self.set_status(match mode {
                    RenderMode::Preview => "Showing rendered preview",
                    RenderMode::RawMarkup => "Showing raw markup",
                });
                false
            }
            (KeyCode::PageDown, _) => {
                self.scroll_preview(self.last_viewport_height.max(1) as isize);
                false
            }
            (KeyCode::PageUp, _) => {
                self.scroll_preview(-(self.last_viewport_height.max(1) as isize));
                false
            }
            (KeyCode::Left, _) => {
                self.editor.move_left();
                false
            }
            (KeyCode::Right, _) => {
                self.editor.move_right();
                false
            }
            (KeyCode::Up, _) => {
                self.editor.move_up();
                false
            }
            (KeyCode::Down, _) => {
                self.editor.move_down();
                false
            }
            (KeyCode::Home, _) => {
                self.editor.move_to_line_start();
                false
            }
            (KeyCode::End, _) => {
                self.editor.move_to_line_end();
                false
            }
            (KeyCode::Enter, _) => self.editor.insert_char('\n'),
            (KeyCode::Tab, _) => self.editor.insert_str(&" ".repeat(TAB_WIDTH)),
            (KeyCode::Backspace, _) => self.editor.backspace(),
            (KeyCode::Delete, _) => self.editor.delete(),
            (KeyCode::Char(ch), m) if !m.intersects(KeyModifiers::CONTROL | KeyModifiers::ALT) => {
                self.editor.insert_char(ch)
            }
            _ => false,
        };

        if changed {
            self.mark_dirty();
        }
    }

    fn scroll_preview(&mut self, delta: isize) {
        let max_scroll = self
            .last_preview_lines
            .saturating_sub(self.last_viewport_height);
        self.preview_scroll = self
            .preview_scroll
            .saturating_add_signed(delta)
            .min(max_scroll);
    }

    fn on_tick(&mut self) {
        self.prune_status_message();
    }

    fn save(&mut self) {
        match save_text(&self.file_path, self.editor.text()) {
            Ok(()) => {
                self.dirty = false;
                self.set_status("Saved");
            }
            Err(err) => {
                warn!(%err, "save failed");
                self.set_status(format!("Save failed: {err}"));
            }
        }
    }

    fn mark_dirty(&mut self) {
        self.dirty = true;
        self.scheduler.notify_edit(self.editor.text());
    }
}
