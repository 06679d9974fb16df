//! Document Renderer: note markup -> styled, paginated PDF
//!
//! Pipeline:
//! ```text
//! note text ──► stamp header ──► pulldown-cmark events
//!                                     │
//!                                     ▼
//!                               Blocks (heading, paragraph, code, table, rule)
//!                                     │
//!                                     ▼
//!                               Composer (word wrap, page breaks) ──► Draw ops per page
//!                                     │
//!                                     ▼
//!                               lopdf Document ──► bytes
//! ```
//!
//! The renderer is pure: same text and timestamp give the same bytes, and it
//! never touches the filesystem.

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, ObjectId, Stream};
use pulldown_cmark::{Event, HeadingLevel, Options, Parser, Tag, TagEnd};
use thiserror::Error;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("Failed to encode page content: {0}")]
    Content(String),

    #[error("Failed to serialize document: {0}")]
    Serialize(String),
}

impl From<RenderError> for String {
    fn from(e: RenderError) -> String {
        e.to_string()
    }
}

// ============================================================================
// PAGE GEOMETRY & THEME
// ============================================================================

pub const A4_WIDTH: f32 = 595.28;
pub const A4_HEIGHT: f32 = 841.89;
const POINTS_PER_CM: f32 = 28.3465;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rgb(pub f32, pub f32, pub f32);

impl Rgb {
    pub fn from_hex(v: u32) -> Rgb {
        let channel = |shift: u32| ((v >> shift) & 0xFF) as f32 / 255.0;
        Rgb(channel(16), channel(8), channel(0))
    }
}

/// "Paper White" print theme
#[derive(Debug, Clone, PartialEq)]
pub struct Theme {
    pub page_width: f32,
    pub page_height: f32,
    pub margin: f32,
    pub body_size: f32,
    pub code_size: f32,
    /// H1..H6
    pub heading_sizes: [f32; 6],
    pub line_spacing: f32,
    pub text: Rgb,
    pub heading: Rgb,
    pub muted: Rgb,
    /// Key points: bold text leading into a colon
    pub accent: Rgb,
    pub rule: Rgb,
    pub code_background: Rgb,
    pub table_header_background: Rgb,
}

impl Default for Theme {
    fn default() -> Self {
        Theme {
            page_width: A4_WIDTH,
            page_height: A4_HEIGHT,
            margin: 2.0 * POINTS_PER_CM,
            body_size: 11.0,
            code_size: 10.0,
            heading_sizes: [22.0, 16.0, 13.0, 12.0, 11.0, 11.0],
            line_spacing: 1.4,
            text: Rgb::from_hex(0x2B2B2B),
            heading: Rgb::from_hex(0x1A1A1A),
            muted: Rgb::from_hex(0x666666),
            accent: Rgb::from_hex(0xCC9A4E),
            rule: Rgb::from_hex(0xCCCCCC),
            code_background: Rgb::from_hex(0xF5F5F5),
            table_header_background: Rgb::from_hex(0xEEEEEE),
        }
    }
}

impl Theme {
    fn content_width(&self) -> f32 {
        self.page_width - 2.0 * self.margin
    }
}

/// Prepend the timestamped separator block to the note
pub fn stamp_note(note_text: &str, timestamp: &str) -> String {
    format!("---\n\n**Added on: {}**\n\n---\n\n{}", timestamp, note_text)
}

/// Render note markup into PDF bytes
pub fn render_pdf(theme: &Theme, note_text: &str, timestamp: &str) -> Result<Vec<u8>, RenderError> {
    let markup = stamp_note(note_text, timestamp);
    let blocks = parse_blocks(&markup);

    let missing = unencodable_chars(&markup);
    if missing > 0 {
        log::warn!(
            "{} character(s) have no WinAnsi glyph and will render as '?'",
            missing
        );
    }

    let mut composer = Composer::new(theme);
    for block in &blocks {
        composer.block(block);
    }
    let pages = composer.finish();

    log::debug!("Rendered {} blocks onto {} page(s)", blocks.len(), pages.len());
    build_pdf(theme, &pages)
}

// ============================================================================
// FONTS & METRICS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Font {
    Regular,
    Bold,
    Italic,
    BoldItalic,
    Mono,
}

impl Font {
    const ALL: [Font; 5] = [Font::Regular, Font::Bold, Font::Italic, Font::BoldItalic, Font::Mono];

    fn key(self) -> &'static str {
        match self {
            Font::Regular => "F1",
            Font::Bold => "F2",
            Font::Italic => "F3",
            Font::BoldItalic => "F4",
            Font::Mono => "F5",
        }
    }

    fn base_name(self) -> &'static str {
        match self {
            Font::Regular => "Helvetica",
            Font::Bold => "Helvetica-Bold",
            Font::Italic => "Helvetica-Oblique",
            Font::BoldItalic => "Helvetica-BoldOblique",
            Font::Mono => "Courier",
        }
    }

    fn for_style(style: Style) -> Font {
        match (style.code, style.bold, style.italic) {
            (true, _, _) => Font::Mono,
            (false, true, true) => Font::BoldItalic,
            (false, true, false) => Font::Bold,
            (false, false, true) => Font::Italic,
            (false, false, false) => Font::Regular,
        }
    }
}

/// Helvetica advance widths (1/1000 em) for ' '..='~'
const HELVETICA_WIDTHS: [u16; 95] = [
    278, 278, 355, 556, 556, 889, 667, 191, 333, 333, 389, 584, 278, 333, 278, 278, // ' '..'/'
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, // 0-9
    278, 278, 584, 584, 584, 556, 1015, // ':'..'@'
    667, 667, 722, 722, 667, 611, 778, 722, 278, 500, 667, 556, 833, // A-M
    722, 778, 667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, // N-Z
    278, 278, 278, 469, 556, 333, // '['..'`'
    556, 556, 500, 556, 556, 278, 556, 556, 222, 222, 500, 222, 833, // a-m
    556, 556, 556, 556, 333, 500, 278, 556, 500, 722, 500, 500, 500, // n-z
    334, 260, 334, 584, // '{'..'~'
];

pub(crate) fn text_width(text: &str, font: Font, size: f32) -> f32 {
    let units: f32 = match font {
        Font::Mono => text.chars().count() as f32 * 600.0,
        _ => text
            .chars()
            .map(|c| match c {
                ' '..='~' => HELVETICA_WIDTHS[c as usize - 32] as f32,
                _ => 556.0,
            })
            .sum(),
    };
    let weight = match font {
        Font::Bold | Font::BoldItalic => 1.06,
        _ => 1.0,
    };
    units * weight * size / 1000.0
}

/// WinAnsiEncoding byte for `c`, if it has one
fn win_ansi_byte(c: char) -> Option<u8> {
    match c {
        ' '..='~' => Some(c as u8),
        '\u{a0}'..='\u{ff}' => Some(c as u32 as u8),
        '\t' => Some(b' '),
        '\u{20ac}' => Some(0x80),
        '\u{2026}' => Some(0x85),
        '\u{2018}' => Some(0x91),
        '\u{2019}' => Some(0x92),
        '\u{201c}' => Some(0x93),
        '\u{201d}' => Some(0x94),
        '\u{2022}' => Some(0x95),
        '\u{2013}' => Some(0x96),
        '\u{2014}' => Some(0x97),
        _ => None,
    }
}

/// Map text onto WinAnsiEncoding; anything unrepresentable becomes '?'
pub(crate) fn encode_win_ansi(text: &str) -> Vec<u8> {
    text.chars().map(|c| win_ansi_byte(c).unwrap_or(b'?')).collect()
}

/// Printable characters that [`encode_win_ansi`] would replace with '?'
pub(crate) fn unencodable_chars(text: &str) -> usize {
    text.chars()
        .filter(|&c| !c.is_control() && win_ansi_byte(c).is_none())
        .count()
}

/// Inverse of [`encode_win_ansi`] for the characters it produces
pub(crate) fn decode_win_ansi(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|&b| match b {
            0x80 => '\u{20ac}',
            0x85 => '\u{2026}',
            0x91 => '\u{2018}',
            0x92 => '\u{2019}',
            0x93 => '\u{201c}',
            0x94 => '\u{201d}',
            0x95 => '\u{2022}',
            0x96 => '\u{2013}',
            0x97 => '\u{2014}',
            _ => b as char,
        })
        .collect()
}

// ============================================================================
// MARKUP -> BLOCKS
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct Style {
    bold: bool,
    italic: bool,
    strike: bool,
    code: bool,
    accent: bool,
}

#[derive(Debug, Clone, PartialEq)]
struct Run {
    text: String,
    style: Style,
}

#[derive(Debug, Clone, PartialEq)]
struct Para {
    runs: Vec<Run>,
    /// List nesting depth
    depth: usize,
    /// Bullet or number for the first line of a list item
    marker: Option<String>,
    quote: bool,
}

#[derive(Debug, Clone, PartialEq)]
enum Block {
    Heading { level: usize, runs: Vec<Run> },
    Paragraph(Para),
    Code { lines: Vec<String>, depth: usize },
    Rule,
    Table { header: Vec<Vec<Run>>, rows: Vec<Vec<Vec<Run>>> },
}

#[derive(Default)]
struct TableBuilder {
    header: Vec<Vec<Run>>,
    rows: Vec<Vec<Vec<Run>>>,
    row: Vec<Vec<Run>>,
    cell: Vec<Run>,
    in_cell: bool,
}

#[derive(Default)]
struct BlockBuilder {
    blocks: Vec<Block>,
    runs: Vec<Run>,
    bold: usize,
    italic: usize,
    strike: usize,
    /// Next number per open list (None = bulleted)
    lists: Vec<Option<u64>>,
    pending_marker: Option<String>,
    quote_depth: usize,
    heading: Option<usize>,
    code: Option<String>,
    table: Option<TableBuilder>,
}

fn heading_number(level: HeadingLevel) -> usize {
    match level {
        HeadingLevel::H1 => 1,
        HeadingLevel::H2 => 2,
        HeadingLevel::H3 => 3,
        HeadingLevel::H4 => 4,
        HeadingLevel::H5 => 5,
        HeadingLevel::H6 => 6,
    }
}

/// Bold text immediately followed by a colon is a key point
fn mark_key_points(runs: &mut [Run]) {
    for i in 0..runs.len() {
        if !runs[i].style.bold {
            continue;
        }
        let ends_in_colon = runs[i].text.trim_end().ends_with(':')
            || runs.get(i + 1).map_or(false, |next| next.text.starts_with(':'));
        if ends_in_colon {
            runs[i].style.accent = true;
        }
    }
}

impl BlockBuilder {
    fn style(&self) -> Style {
        Style {
            bold: self.bold > 0 || self.heading.is_some(),
            italic: self.italic > 0,
            strike: self.strike > 0,
            code: false,
            accent: false,
        }
    }

    fn push_text(&mut self, text: &str, style: Style) {
        if let Some(code) = self.code.as_mut() {
            code.push_str(text);
            return;
        }
        let run = Run {
            text: text.to_string(),
            style,
        };
        match self.table.as_mut() {
            Some(table) if table.in_cell => table.cell.push(run),
            _ => self.runs.push(run),
        }
    }

    fn flush(&mut self) {
        if self.runs.iter().all(|r| r.text.trim().is_empty()) {
            self.runs.clear();
            return;
        }
        let mut runs = std::mem::take(&mut self.runs);
        mark_key_points(&mut runs);

        if let Some(level) = self.heading {
            self.blocks.push(Block::Heading { level, runs });
            return;
        }
        self.blocks.push(Block::Paragraph(Para {
            runs,
            depth: self.lists.len(),
            marker: self.pending_marker.take(),
            quote: self.quote_depth > 0,
        }));
    }

    fn next_marker(&mut self) -> String {
        match self.lists.last_mut() {
            Some(Some(n)) => {
                let marker = format!("{}.", n);
                *n += 1;
                marker
            }
            _ => "\u{2022}".to_string(),
        }
    }

    fn start(&mut self, tag: Tag) {
        match tag {
            Tag::Paragraph => self.flush(),
            Tag::Heading { level, .. } => {
                self.flush();
                self.heading = Some(heading_number(level));
            }
            Tag::BlockQuote => {
                self.flush();
                self.quote_depth += 1;
            }
            Tag::CodeBlock(_) => {
                self.flush();
                self.code = Some(String::new());
            }
            Tag::List(start) => {
                self.flush();
                self.lists.push(start);
            }
            Tag::Item => {
                self.flush();
                self.pending_marker = Some(self.next_marker());
            }
            Tag::Table(_) => {
                self.flush();
                self.table = Some(TableBuilder::default());
            }
            Tag::TableHead | Tag::TableRow => {
                if let Some(table) = self.table.as_mut() {
                    table.row.clear();
                }
            }
            Tag::TableCell => {
                if let Some(table) = self.table.as_mut() {
                    table.cell.clear();
                    table.in_cell = true;
                }
            }
            Tag::Emphasis => self.italic += 1,
            Tag::Strong => self.bold += 1,
            Tag::Strikethrough => self.strike += 1,
            _ => {}
        }
    }

    fn end(&mut self, tag: TagEnd) {
        match tag {
            TagEnd::Paragraph => self.flush(),
            TagEnd::Heading(_) => {
                self.flush();
                self.heading = None;
            }
            TagEnd::BlockQuote => {
                self.flush();
                self.quote_depth = self.quote_depth.saturating_sub(1);
            }
            TagEnd::CodeBlock => {
                let source = self.code.take().unwrap_or_default();
                let lines = source
                    .trim_end_matches('\n')
                    .lines()
                    .map(|l| l.replace('\t', "    "))
                    .collect();
                self.blocks.push(Block::Code {
                    lines,
                    depth: self.lists.len(),
                });
            }
            TagEnd::List(_) => {
                self.flush();
                self.lists.pop();
            }
            TagEnd::Item => {
                self.flush();
                self.pending_marker = None;
            }
            TagEnd::TableCell => {
                if let Some(table) = self.table.as_mut() {
                    let mut cell = std::mem::take(&mut table.cell);
                    mark_key_points(&mut cell);
                    table.row.push(cell);
                    table.in_cell = false;
                }
            }
            TagEnd::TableHead => {
                if let Some(table) = self.table.as_mut() {
                    table.header = std::mem::take(&mut table.row);
                }
            }
            TagEnd::TableRow => {
                if let Some(table) = self.table.as_mut() {
                    let row = std::mem::take(&mut table.row);
                    table.rows.push(row);
                }
            }
            TagEnd::Table => {
                if let Some(table) = self.table.take() {
                    self.blocks.push(Block::Table {
                        header: table.header,
                        rows: table.rows,
                    });
                }
            }
            TagEnd::Emphasis => self.italic = self.italic.saturating_sub(1),
            TagEnd::Strong => self.bold = self.bold.saturating_sub(1),
            TagEnd::Strikethrough => self.strike = self.strike.saturating_sub(1),
            _ => {}
        }
    }

    fn event(&mut self, event: Event) {
        match event {
            Event::Start(tag) => self.start(tag),
            Event::End(tag) => self.end(tag),
            Event::Text(text) => {
                let style = self.style();
                self.push_text(&text, style);
            }
            Event::Code(text) => {
                let style = Style {
                    code: true,
                    ..self.style()
                };
                self.push_text(&text, style);
            }
            Event::Html(text) => {
                let style = self.style();
                self.push_text(&text, style);
            }
            Event::SoftBreak => {
                let style = self.style();
                self.push_text(" ", style);
            }
            Event::HardBreak => {
                let style = self.style();
                self.push_text("\n", style);
            }
            Event::Rule => {
                self.flush();
                self.blocks.push(Block::Rule);
            }
            _ => {}
        }
    }
}

fn parse_blocks(markup: &str) -> Vec<Block> {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);

    let mut builder = BlockBuilder::default();
    for event in Parser::new_ext(markup, options) {
        builder.event(event);
    }
    builder.flush();
    builder.blocks
}

// ============================================================================
// LAYOUT
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Draw {
    Text {
        x: f32,
        y: f32,
        font: Font,
        size: f32,
        color: Rgb,
        text: String,
    },
    Line {
        from: (f32, f32),
        to: (f32, f32),
        width: f32,
        color: Rgb,
    },
    Rect {
        x: f32,
        y: f32,
        w: f32,
        h: f32,
        color: Rgb,
    },
}

/// A positioned word fragment within one wrapped line
#[derive(Debug, Clone, PartialEq)]
struct Piece {
    x: f32,
    width: f32,
    text: String,
    style: Style,
}

fn piece_font(style: Style, force_bold: bool) -> Font {
    Font::for_style(Style {
        bold: style.bold || force_bold,
        ..style
    })
}

fn piece_size(style: Style, size: f32) -> f32 {
    if style.code {
        size * 0.92
    } else {
        size
    }
}

/// Greedy word wrap of styled runs into lines no wider than `max_width`
fn wrap_runs(runs: &[Run], size: f32, max_width: f32, force_bold: bool) -> Vec<Vec<Piece>> {
    let mut lines: Vec<Vec<Piece>> = Vec::new();
    let mut line: Vec<Piece> = Vec::new();
    let mut line_width = 0.0_f32;
    let mut pending_space = false;

    for run in runs {
        let font = piece_font(run.style, force_bold);
        let run_size = piece_size(run.style, size);

        for (seg_index, segment) in run.text.split('\n').enumerate() {
            if seg_index > 0 {
                lines.push(std::mem::take(&mut line));
                line_width = 0.0;
                pending_space = false;
            }

            for (word_index, word) in segment.split(' ').enumerate() {
                if word_index > 0 {
                    pending_space = !line.is_empty();
                }
                if word.is_empty() {
                    continue;
                }

                let mut space = if pending_space {
                    text_width(" ", font, run_size)
                } else {
                    0.0
                };
                let width = text_width(word, font, run_size);

                if !line.is_empty() && line_width + space + width > max_width {
                    lines.push(std::mem::take(&mut line));
                    line_width = 0.0;
                    space = 0.0;
                }

                if width <= max_width {
                    line.push(Piece {
                        x: line_width + space,
                        width,
                        text: word.to_string(),
                        style: run.style,
                    });
                    line_width += space + width;
                } else {
                    // Hard-break a word wider than the column
                    let mut chunk = String::new();
                    for c in word.chars() {
                        let mut candidate = chunk.clone();
                        candidate.push(c);
                        if !chunk.is_empty()
                            && line_width + text_width(&candidate, font, run_size) > max_width
                        {
                            let chunk_width = text_width(&chunk, font, run_size);
                            line.push(Piece {
                                x: line_width,
                                width: chunk_width,
                                text: std::mem::take(&mut chunk),
                                style: run.style,
                            });
                            lines.push(std::mem::take(&mut line));
                            line_width = 0.0;
                            chunk.push(c);
                        } else {
                            chunk = candidate;
                        }
                    }
                    if !chunk.is_empty() {
                        let chunk_width = text_width(&chunk, font, run_size);
                        line.push(Piece {
                            x: line_width,
                            width: chunk_width,
                            text: chunk,
                            style: run.style,
                        });
                        line_width += chunk_width;
                    }
                }
                pending_space = false;
            }
        }
    }

    if !line.is_empty() {
        lines.push(line);
    }
    lines
}

const LIST_INDENT: f32 = 18.0;
const QUOTE_INDENT: f32 = 14.0;
const PARAGRAPH_GAP: f32 = 6.0;
const ITEM_GAP: f32 = 2.0;
const CELL_PADDING: f32 = 4.0;

struct Composer<'a> {
    theme: &'a Theme,
    pages: Vec<Vec<Draw>>,
    current: Vec<Draw>,
    /// Top of the next line; moves downward
    y: f32,
}

impl<'a> Composer<'a> {
    fn new(theme: &'a Theme) -> Self {
        Composer {
            theme,
            pages: Vec::new(),
            current: Vec::new(),
            y: theme.page_height - theme.margin,
        }
    }

    fn new_page(&mut self) {
        self.pages.push(std::mem::take(&mut self.current));
        self.y = self.theme.page_height - self.theme.margin;
    }

    /// Break the page unless `height` still fits. A fresh page always accepts.
    fn ensure(&mut self, height: f32) {
        if self.y - height < self.theme.margin && !self.current.is_empty() {
            self.new_page();
        }
    }

    fn gap(&mut self, height: f32) {
        // Gaps never carry over to the top of a new page
        self.y = (self.y - height).max(self.theme.margin);
    }

    fn finish(mut self) -> Vec<Vec<Draw>> {
        if !self.current.is_empty() || self.pages.is_empty() {
            self.new_page();
        }
        self.pages
    }

    fn line_height(&self, size: f32) -> f32 {
        size * self.theme.line_spacing
    }

    fn draw_pieces(
        &mut self,
        x0: f32,
        baseline: f32,
        pieces: &[Piece],
        size: f32,
        color: Rgb,
        force_bold: bool,
    ) {
        for piece in pieces {
            let font = piece_font(piece.style, force_bold);
            let run_size = piece_size(piece.style, size);
            let x = x0 + piece.x;
            let fill = if piece.style.accent {
                self.theme.accent
            } else {
                color
            };
            self.current.push(Draw::Text {
                x,
                y: baseline,
                font,
                size: run_size,
                color: fill,
                text: piece.text.clone(),
            });
            if piece.style.strike {
                let mid = baseline + run_size * 0.3;
                self.current.push(Draw::Line {
                    from: (x, mid),
                    to: (x + piece.width, mid),
                    width: 0.8,
                    color: fill,
                });
            }
        }
    }

    /// Place one wrapped line at the cursor, returning its baseline
    fn place_line(&mut self, x0: f32, pieces: &[Piece], size: f32, color: Rgb, force_bold: bool) -> f32 {
        let height = self.line_height(size);
        self.ensure(height);
        let baseline = self.y - size;
        self.draw_pieces(x0, baseline, pieces, size, color, force_bold);
        self.y -= height;
        baseline
    }

    fn block(&mut self, block: &Block) {
        match block {
            Block::Heading { level, runs } => self.heading(*level, runs),
            Block::Paragraph(para) => self.paragraph(para),
            Block::Code { lines, depth } => self.code(lines, *depth),
            Block::Rule => self.rule(),
            Block::Table { header, rows } => self.table(header, rows),
        }
    }

    fn heading(&mut self, level: usize, runs: &[Run]) {
        let size = self.theme.heading_sizes[level.clamp(1, 6) - 1];
        self.gap(size * 0.5);

        let margin = self.theme.margin;
        let color = self.theme.heading;
        let lines = wrap_runs(runs, size, self.theme.content_width(), true);
        let mut last_baseline = self.y;
        for line in &lines {
            last_baseline = self.place_line(margin, line, size, color, true);
        }

        if level == 1 {
            let y = last_baseline - 4.0;
            self.current.push(Draw::Line {
                from: (margin, y),
                to: (self.theme.page_width - margin, y),
                width: 1.0,
                color: self.theme.accent,
            });
        }
        self.gap(PARAGRAPH_GAP);
    }

    fn paragraph(&mut self, para: &Para) {
        let size = self.theme.body_size;
        let list_indent = para.depth as f32 * LIST_INDENT;
        let quote_indent = if para.quote { QUOTE_INDENT } else { 0.0 };
        let x0 = self.theme.margin + list_indent + quote_indent;
        let width = self.theme.content_width() - list_indent - quote_indent;
        let color = if para.quote {
            self.theme.muted
        } else {
            self.theme.text
        };

        let lines = wrap_runs(&para.runs, size, width, false);
        for (i, line) in lines.iter().enumerate() {
            let baseline = self.place_line(x0, line, size, color, false);

            if i == 0 {
                if let Some(marker) = &para.marker {
                    let marker_x = x0 - text_width(marker, Font::Regular, size) - 5.0;
                    self.current.push(Draw::Text {
                        x: marker_x,
                        y: baseline,
                        font: Font::Regular,
                        size,
                        color,
                        text: marker.clone(),
                    });
                }
            }
            if para.quote {
                let bar_x = self.theme.margin + list_indent + 4.0;
                self.current.push(Draw::Line {
                    from: (bar_x, baseline - 3.0),
                    to: (bar_x, baseline + size),
                    width: 2.0,
                    color: self.theme.accent,
                });
            }
        }

        let gap = if para.marker.is_some() {
            ITEM_GAP
        } else {
            PARAGRAPH_GAP
        };
        self.gap(gap);
    }

    fn code(&mut self, lines: &[String], depth: usize) {
        let size = self.theme.code_size;
        let height = size * 1.35;
        let x0 = self.theme.margin + depth as f32 * LIST_INDENT;
        let box_width = self.theme.content_width() - depth as f32 * LIST_INDENT;
        let char_width = text_width("M", Font::Mono, size);
        let per_line = (((box_width - 12.0) / char_width).floor() as usize).max(1);

        self.gap(4.0);
        let mut chunks: Vec<String> = Vec::new();
        for line in lines {
            let chars: Vec<char> = line.chars().collect();
            if chars.is_empty() {
                chunks.push(String::new());
            }
            for chunk in chars.chunks(per_line) {
                chunks.push(chunk.iter().collect());
            }
        }
        if chunks.is_empty() {
            chunks.push(String::new());
        }

        for chunk in chunks {
            self.ensure(height);
            self.current.push(Draw::Rect {
                x: x0,
                y: self.y - height,
                w: box_width,
                h: height,
                color: self.theme.code_background,
            });
            if !chunk.is_empty() {
                self.current.push(Draw::Text {
                    x: x0 + 6.0,
                    y: self.y - height + (height - size) / 2.0 + size * 0.22,
                    font: Font::Mono,
                    size,
                    color: self.theme.text,
                    text: chunk,
                });
            }
            self.y -= height;
        }
        self.gap(PARAGRAPH_GAP + 4.0);
    }

    fn rule(&mut self) {
        self.ensure(12.0);
        self.gap(6.0);
        let y = self.y;
        self.current.push(Draw::Line {
            from: (self.theme.margin, y),
            to: (self.theme.page_width - self.theme.margin, y),
            width: 0.75,
            color: self.theme.rule,
        });
        self.gap(6.0);
    }

    fn table(&mut self, header: &[Vec<Run>], rows: &[Vec<Vec<Run>>]) {
        let columns = rows
            .iter()
            .map(Vec::len)
            .chain(std::iter::once(header.len()))
            .max()
            .unwrap_or(0);
        if columns == 0 {
            return;
        }

        let size = self.theme.body_size;
        let line_height = self.line_height(size);
        let margin = self.theme.margin;
        let column_width = self.theme.content_width() / columns as f32;

        self.gap(4.0);
        let all_rows = std::iter::once((true, header)).chain(rows.iter().map(|r| (false, r.as_slice())));
        for (is_header, cells) in all_rows {
            if is_header && cells.is_empty() {
                continue;
            }

            let wrapped: Vec<Vec<Vec<Piece>>> = (0..columns)
                .map(|c| {
                    cells
                        .get(c)
                        .map(|runs| wrap_runs(runs, size, column_width - 2.0 * CELL_PADDING, is_header))
                        .unwrap_or_default()
                })
                .collect();
            let line_count = wrapped.iter().map(Vec::len).max().unwrap_or(0).max(1);
            let row_height = line_count as f32 * line_height + 2.0 * CELL_PADDING;

            self.ensure(row_height);
            let top = self.y;
            let bottom = top - row_height;

            if is_header {
                self.current.push(Draw::Rect {
                    x: margin,
                    y: bottom,
                    w: column_width * columns as f32,
                    h: row_height,
                    color: self.theme.table_header_background,
                });
            }

            let color = self.theme.text;
            for (c, lines) in wrapped.iter().enumerate() {
                let x0 = margin + c as f32 * column_width + CELL_PADDING;
                for (i, line) in lines.iter().enumerate() {
                    let baseline = top - CELL_PADDING - size - i as f32 * line_height;
                    self.draw_pieces(x0, baseline, line, size, color, is_header);
                }
            }

            let right = margin + column_width * columns as f32;
            for y in [top, bottom] {
                self.current.push(Draw::Line {
                    from: (margin, y),
                    to: (right, y),
                    width: 0.5,
                    color: self.theme.rule,
                });
            }
            for c in 0..=columns {
                let x = margin + c as f32 * column_width;
                self.current.push(Draw::Line {
                    from: (x, top),
                    to: (x, bottom),
                    width: 0.5,
                    color: self.theme.rule,
                });
            }

            self.y = bottom;
        }
        self.gap(PARAGRAPH_GAP);
    }
}

// ============================================================================
// PDF ASSEMBLY
// ============================================================================

fn color_operands(color: Rgb) -> Vec<Object> {
    vec![color.0.into(), color.1.into(), color.2.into()]
}

fn draw_operations(draws: &[Draw]) -> Vec<Operation> {
    let mut ops = Vec::new();
    for draw in draws {
        match draw {
            Draw::Text {
                x,
                y,
                font,
                size,
                color,
                text,
            } => {
                ops.push(Operation::new("rg", color_operands(*color)));
                ops.push(Operation::new("BT", vec![]));
                ops.push(Operation::new("Tf", vec![font.key().into(), (*size).into()]));
                ops.push(Operation::new("Td", vec![(*x).into(), (*y).into()]));
                ops.push(Operation::new(
                    "Tj",
                    vec![Object::string_literal(encode_win_ansi(text))],
                ));
                ops.push(Operation::new("ET", vec![]));
            }
            Draw::Line {
                from,
                to,
                width,
                color,
            } => {
                ops.push(Operation::new("RG", color_operands(*color)));
                ops.push(Operation::new("w", vec![(*width).into()]));
                ops.push(Operation::new("m", vec![from.0.into(), from.1.into()]));
                ops.push(Operation::new("l", vec![to.0.into(), to.1.into()]));
                ops.push(Operation::new("S", vec![]));
            }
            Draw::Rect { x, y, w, h, color } => {
                ops.push(Operation::new("rg", color_operands(*color)));
                ops.push(Operation::new(
                    "re",
                    vec![(*x).into(), (*y).into(), (*w).into(), (*h).into()],
                ));
                ops.push(Operation::new("f", vec![]));
            }
        }
    }
    ops
}

fn build_pdf(theme: &Theme, pages: &[Vec<Draw>]) -> Result<Vec<u8>, RenderError> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let mut fonts = lopdf::Dictionary::new();
    for font in Font::ALL {
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => font.base_name(),
            "Encoding" => "WinAnsiEncoding",
        });
        fonts.set(font.key(), font_id);
    }
    let resources_id = doc.add_object(dictionary! {
        "Font" => fonts,
    });

    let media_box: Vec<Object> = vec![
        0.into(),
        0.into(),
        theme.page_width.into(),
        theme.page_height.into(),
    ];
    let mut kids: Vec<Object> = Vec::with_capacity(pages.len());
    for draws in pages {
        let content = Content {
            operations: draw_operations(draws),
        };
        let encoded = content
            .encode()
            .map_err(|e| RenderError::Content(e.to_string()))?;
        let content_id = doc.add_object(Stream::new(dictionary! {}, encoded));
        let page_id: ObjectId = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => resources_id,
            "MediaBox" => media_box.clone(),
        });
        kids.push(page_id.into());
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes)
        .map_err(|e| RenderError::Serialize(e.to_string()))?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn texts(blocks: &[Block]) -> Vec<String> {
        blocks
            .iter()
            .map(|b| match b {
                Block::Heading { runs, .. } => runs.iter().map(|r| r.text.as_str()).collect(),
                Block::Paragraph(p) => p.runs.iter().map(|r| r.text.as_str()).collect(),
                Block::Code { lines, .. } => lines.join("\n"),
                Block::Rule => "---".to_string(),
                Block::Table { .. } => "<table>".to_string(),
            })
            .collect()
    }

    #[test]
    fn test_stamp_note() {
        assert_eq!(
            stamp_note("# Hi", "January 05, 2026 at 09:15 AM"),
            "---\n\n**Added on: January 05, 2026 at 09:15 AM**\n\n---\n\n# Hi"
        );
    }

    #[test]
    fn test_parse_blocks_structure() {
        let blocks = parse_blocks(&stamp_note(
            "# Title\n\nSome *text* here.\n\n- one\n- two\n\n```\nlet x = 1;\n```\n",
            "now",
        ));
        assert_eq!(
            texts(&blocks),
            vec!["---", "Added on: now", "---", "Title", "Some text here.", "one", "two", "let x = 1;"]
        );
        assert!(matches!(blocks[3], Block::Heading { level: 1, .. }));
        match &blocks[5] {
            Block::Paragraph(p) => {
                assert_eq!(p.depth, 1);
                assert_eq!(p.marker.as_deref(), Some("\u{2022}"));
            }
            other => panic!("expected list paragraph, got {:?}", other),
        }
    }

    #[test]
    fn test_ordered_list_markers() {
        let blocks = parse_blocks("3. three\n4. four\n");
        let markers: Vec<_> = blocks
            .iter()
            .filter_map(|b| match b {
                Block::Paragraph(p) => p.marker.clone(),
                _ => None,
            })
            .collect();
        assert_eq!(markers, vec!["3.", "4."]);
    }

    #[test]
    fn test_table_and_strikethrough() {
        let blocks = parse_blocks("| A | B |\n|---|---|\n| 1 | ~~2~~ |\n");
        match &blocks[0] {
            Block::Table { header, rows } => {
                assert_eq!(header.len(), 2);
                assert_eq!(rows.len(), 1);
                assert!(rows[0][1][0].style.strike);
            }
            other => panic!("expected table, got {:?}", other),
        }
    }

    #[test]
    fn test_key_points_get_accent() {
        let blocks = parse_blocks("**Definition:** a thing\n\n**Plain** text");
        let accents: Vec<bool> = blocks
            .iter()
            .filter_map(|b| match b {
                Block::Paragraph(p) => Some(p.runs[0].style.accent),
                _ => None,
            })
            .collect();
        assert_eq!(accents, vec![true, false]);
    }

    #[test]
    fn test_wrap_runs_respects_width() {
        let run = Run {
            text: "lorem ipsum dolor sit amet ".repeat(20),
            style: Style::default(),
        };
        let lines = wrap_runs(&[run], 11.0, 200.0, false);
        assert!(lines.len() > 1);
        for line in &lines {
            let last = line.last().unwrap();
            assert!(last.x + last.width <= 200.0 + 0.01);
        }
    }

    #[test]
    fn test_wrap_breaks_long_words() {
        let run = Run {
            text: "x".repeat(500),
            style: Style::default(),
        };
        let lines = wrap_runs(&[run], 11.0, 100.0, false);
        assert!(lines.len() > 1);
        let total: usize = lines.iter().flatten().map(|p| p.text.len()).sum();
        assert_eq!(total, 500);
    }

    #[test]
    fn test_long_note_paginates() {
        let theme = Theme::default();
        let note: String = (0..150).map(|i| format!("Paragraph number {}\n\n", i)).collect();
        let mut composer = Composer::new(&theme);
        for block in parse_blocks(&stamp_note(&note, "now")) {
            composer.block(&block);
        }
        let pages = composer.finish();
        assert!(pages.len() >= 2);
        assert!(pages.iter().all(|p| !p.is_empty()));
    }

    #[test]
    fn test_render_is_deterministic() {
        let theme = Theme::default();
        let a = render_pdf(&theme, "# Hello\n\nWorld", "January 05, 2026 at 09:15 AM").unwrap();
        let b = render_pdf(&theme, "# Hello\n\nWorld", "January 05, 2026 at 09:15 AM").unwrap();
        assert_eq!(a, b);
        assert!(a.starts_with(b"%PDF-1.5"));

        let c = render_pdf(&theme, "# Hello\n\nWorld", "January 05, 2026 at 09:16 AM").unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn test_win_ansi_round_trip_and_fallback() {
        assert_eq!(encode_win_ansi("a\u{2022}b"), vec![b'a', 0x95, b'b']);
        assert_eq!(encode_win_ansi("\u{1F4C5}"), vec![b'?']);
        assert_eq!(unencodable_chars("caf\u{e9}\n\u{2014}"), 0);
        assert_eq!(unencodable_chars("\u{3b1}\u{3b2} and \u{1F4C5}"), 3);
        assert_eq!(decode_win_ansi(&encode_win_ansi("caf\u{e9} \u{2014} ok")), "caf\u{e9} \u{2014} ok");
    }

    #[test]
    fn test_text_width() {
        assert_eq!(text_width("ab", Font::Mono, 10.0), 12.0);
        let regular = text_width("Hello", Font::Regular, 11.0);
        assert!(text_width("Hello", Font::Bold, 11.0) > regular);
        assert!(text_width("", Font::Regular, 11.0) == 0.0);
    }
}
