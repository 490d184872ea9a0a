use std::cmp::Ordering;
use std::io;

use camino::Utf8PathBuf;
use crossterm::ExecutableCommand;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind};
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use miette::IntoDiagnostic;
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Alignment, Constraint, Direction, Layout};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Cell, Paragraph, Row, Table, TableState, Wrap};

use crate::domain::{BdnsId, FlattenedRow};
use crate::export::export_to_path;
use crate::query::{self, DateRange, Filters, Summary, YearSummary};

const EXPORT_FILE: &str = "bdns_filtrados.csv";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum View {
    Browse,
    Stats,
    Help,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Years,
    Ids,
    Description,
    Region,
    Sector,
    BudgetMin,
    BudgetMax,
    ReceptionFrom,
    ReceptionTo,
    Status,
}

const SLOTS: [Slot; 10] = [
    Slot::Years,
    Slot::Ids,
    Slot::Description,
    Slot::Region,
    Slot::Sector,
    Slot::BudgetMin,
    Slot::BudgetMax,
    Slot::ReceptionFrom,
    Slot::ReceptionTo,
    Slot::Status,
];

impl Slot {
    fn label(self) -> &'static str {
        match self {
            Slot::Years => "Año",
            Slot::Ids => "BDNS",
            Slot::Description => "Texto",
            Slot::Region => "Región",
            Slot::Sector => "Sector",
            Slot::BudgetMin => "Presup. min",
            Slot::BudgetMax => "Presup. max",
            Slot::ReceptionFrom => "Recepción desde",
            Slot::ReceptionTo => "Recepción hasta",
            Slot::Status => "Estado",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SortColumn {
    Bdns,
    Reception,
    Budget,
    Region,
    Sector,
}

impl SortColumn {
    fn label(self) -> &'static str {
        match self {
            SortColumn::Bdns => "BDNS",
            SortColumn::Reception => "fecha",
            SortColumn::Budget => "presupuesto",
            SortColumn::Region => "región",
            SortColumn::Sector => "sector",
        }
    }

    fn next(self) -> Self {
        match self {
            SortColumn::Bdns => SortColumn::Reception,
            SortColumn::Reception => SortColumn::Budget,
            SortColumn::Budget => SortColumn::Region,
            SortColumn::Region => SortColumn::Sector,
            SortColumn::Sector => SortColumn::Bdns,
        }
    }
}

/// Interactive explorer over an immutable snapshot of the loaded
/// partitions. Filtering, sorting and export never touch the files on
/// disk.
pub struct Dashboard {
    rows: Vec<FlattenedRow>,
    filtered: Vec<FlattenedRow>,
    year_stats: Vec<YearSummary>,
    view: View,
    active_slot: usize,
    inputs: [String; SLOTS.len()],
    sort: SortColumn,
    sort_desc: bool,
    table_state: TableState,
    status: String,
}

impl Dashboard {
    pub fn new(rows: Vec<FlattenedRow>) -> Self {
        let filtered = rows.clone();
        let year_stats = query::summarize_by_year(&rows);
        let mut dashboard = Self {
            rows,
            filtered,
            year_stats,
            view: View::Browse,
            active_slot: 0,
            inputs: Default::default(),
            sort: SortColumn::Bdns,
            sort_desc: false,
            table_state: TableState::default(),
            status: "TAB campo · ENTER aplicar · F1 ayuda · ESC salir".to_string(),
        };
        dashboard.sort_filtered();
        dashboard
    }

    pub fn run(mut self) -> miette::Result<()> {
        let mut stdout = io::stdout();
        enable_raw_mode().into_diagnostic()?;
        stdout.execute(EnterAlternateScreen).into_diagnostic()?;

        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend).into_diagnostic()?;
        terminal.clear().into_diagnostic()?;

        let result = self.event_loop(&mut terminal);

        disable_raw_mode().into_diagnostic()?;
        let mut stdout = io::stdout();
        stdout.execute(LeaveAlternateScreen).into_diagnostic()?;
        result
    }

    fn event_loop(
        &mut self,
        terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    ) -> miette::Result<()> {
        loop {
            terminal
                .draw(|frame| self.draw(frame))
                .into_diagnostic()?;

            if event::poll(std::time::Duration::from_millis(250)).into_diagnostic()? {
                if let Event::Key(key) = event::read().into_diagnostic()? {
                    if self.handle_key(key) {
                        return Ok(());
                    }
                }
            }
        }
    }

    fn handle_key(&mut self, key: KeyEvent) -> bool {
        if key.kind != KeyEventKind::Press {
            return false;
        }
        match key.code {
            KeyCode::Esc => return true,
            KeyCode::F(1) => self.view = View::Help,
            KeyCode::F(2) => self.view = View::Stats,
            KeyCode::F(3) => self.view = View::Browse,
            KeyCode::F(4) => {
                self.sort = self.sort.next();
                self.sort_filtered();
                self.status = format!("ordenado por {}", self.sort.label());
            }
            KeyCode::F(5) => {
                self.sort_desc = !self.sort_desc;
                self.sort_filtered();
            }
            KeyCode::F(6) => self.export(),
            KeyCode::F(8) => {
                self.inputs = Default::default();
                self.apply_filters();
                self.status = "filtros limpiados".to_string();
            }
            KeyCode::Tab => {
                self.active_slot = (self.active_slot + 1) % SLOTS.len();
            }
            KeyCode::BackTab => {
                self.active_slot = (self.active_slot + SLOTS.len() - 1) % SLOTS.len();
            }
            KeyCode::Enter => self.apply_filters(),
            KeyCode::Backspace => {
                self.inputs[self.active_slot].pop();
            }
            KeyCode::Char(ch) => {
                self.inputs[self.active_slot].push(ch);
            }
            KeyCode::Up => self.select_offset(-1),
            KeyCode::Down => self.select_offset(1),
            KeyCode::PageUp => self.select_offset(-20),
            KeyCode::PageDown => self.select_offset(20),
            _ => {}
        }
        false
    }

    fn select_offset(&mut self, delta: i64) {
        if self.filtered.is_empty() {
            self.table_state.select(None);
            return;
        }
        let current = self.table_state.selected().unwrap_or(0) as i64;
        let last = self.filtered.len() as i64 - 1;
        let next = (current + delta).clamp(0, last);
        self.table_state.select(Some(next as usize));
    }

    fn apply_filters(&mut self) {
        let filters = self.build_filters();
        self.filtered = query::apply(&self.rows, &filters);
        self.sort_filtered();
        self.table_state.select(if self.filtered.is_empty() {
            None
        } else {
            Some(0)
        });
        self.status = format!("{} filas tras filtrar", self.filtered.len());
    }

    fn slot_input(&self, slot: Slot) -> &str {
        let idx = SLOTS.iter().position(|s| *s == slot).unwrap_or(0);
        self.inputs[idx].trim()
    }

    fn build_filters(&self) -> Filters {
        let years = csv_list(self.slot_input(Slot::Years))
            .iter()
            .filter_map(|item| item.parse().ok())
            .collect();
        let ids = csv_list(self.slot_input(Slot::Ids))
            .iter()
            .filter_map(|item| item.parse::<BdnsId>().ok())
            .collect();
        let regions = csv_list(self.slot_input(Slot::Region));

        Filters {
            ids,
            description: non_empty(self.slot_input(Slot::Description)),
            reception: DateRange {
                from: crate::domain::parse_date(self.slot_input(Slot::ReceptionFrom)),
                to: crate::domain::parse_date(self.slot_input(Slot::ReceptionTo)),
            },
            budget_min: self.slot_input(Slot::BudgetMin).parse().ok(),
            budget_max: self.slot_input(Slot::BudgetMax).parse().ok(),
            regions,
            sector: non_empty(self.slot_input(Slot::Sector)),
            abierto: parse_status(self.slot_input(Slot::Status)),
            years,
            ..Filters::default()
        }
    }

    fn sort_filtered(&mut self) {
        let sort = self.sort;
        self.filtered.sort_by(|a, b| match sort {
            SortColumn::Bdns => a.codigo_bdns.cmp(&b.codigo_bdns),
            SortColumn::Reception => a.fecha_recepcion.cmp(&b.fecha_recepcion),
            SortColumn::Budget => a
                .presupuesto_total
                .partial_cmp(&b.presupuesto_total)
                .unwrap_or(Ordering::Equal),
            SortColumn::Region => a.region.cmp(&b.region),
            SortColumn::Sector => a.sector.cmp(&b.sector),
        });
        if self.sort_desc {
            self.filtered.reverse();
        }
    }

    fn export(&mut self) {
        let path = Utf8PathBuf::from(EXPORT_FILE);
        self.status = match export_to_path(&path, &self.filtered) {
            Ok(()) => format!("{} filas exportadas a {path}", self.filtered.len()),
            Err(err) => format!("export falló: {err}"),
        };
    }

    fn draw(&mut self, frame: &mut ratatui::Frame) {
        match self.view {
            View::Browse => self.draw_browse(frame),
            View::Stats => self.draw_stats(frame),
            View::Help => draw_help(frame),
        }
    }

    fn draw_browse(&mut self, frame: &mut ratatui::Frame) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(3),
                Constraint::Length(3),
                Constraint::Length(4),
                Constraint::Min(6),
                Constraint::Length(1),
            ])
            .split(frame.area());

        frame.render_widget(draw_header("CONVOCATORIAS"), chunks[0]);
        frame.render_widget(self.draw_summary(), chunks[1]);
        frame.render_widget(self.draw_filter_bar(), chunks[2]);

        let table = self.draw_table();
        frame.render_stateful_widget(table, chunks[3], &mut self.table_state);

        let footer = Paragraph::new(Line::from(self.status.clone()))
            .style(Style::default().fg(Color::Gray));
        frame.render_widget(footer, chunks[4]);
    }

    fn draw_summary(&self) -> Paragraph<'static> {
        let Summary {
            rows,
            unique_ids,
            total_budget,
            mean_budget,
        } = query::summarize(&self.filtered);
        let line = Line::from(vec![
            Span::styled("Registros: ", Style::default().fg(Color::Gray)),
            Span::styled(format!("{rows}"), Style::default().fg(Color::Cyan)),
            Span::styled("   BDNS únicos: ", Style::default().fg(Color::Gray)),
            Span::styled(format!("{unique_ids}"), Style::default().fg(Color::Cyan)),
            Span::styled("   Presupuesto total: ", Style::default().fg(Color::Gray)),
            Span::styled(format_euros(total_budget), Style::default().fg(Color::Cyan)),
            Span::styled("   Medio: ", Style::default().fg(Color::Gray)),
            Span::styled(
                mean_budget.map(format_euros).unwrap_or_else(|| "n/a".to_string()),
                Style::default().fg(Color::Cyan),
            ),
        ]);
        Paragraph::new(line).block(Block::default().borders(Borders::BOTTOM))
    }

    fn draw_filter_bar(&self) -> Paragraph<'static> {
        let mut spans = Vec::new();
        for (idx, slot) in SLOTS.iter().enumerate() {
            let active = idx == self.active_slot;
            let label_style = if active {
                Style::default()
                    .fg(Color::Yellow)
                    .add_modifier(Modifier::BOLD)
            } else {
                Style::default().fg(Color::Gray)
            };
            spans.push(Span::styled(format!("{}: ", slot.label()), label_style));
            let value = &self.inputs[idx];
            let shown = if value.is_empty() && !active {
                "·".to_string()
            } else if active {
                format!("{value}_")
            } else {
                value.clone()
            };
            spans.push(Span::styled(
                shown,
                if active {
                    Style::default().fg(Color::White)
                } else {
                    Style::default().fg(Color::DarkGray)
                },
            ));
            spans.push(Span::raw("  "));
        }
        Paragraph::new(Line::from(spans))
            .wrap(Wrap { trim: false })
            .block(Block::default().borders(Borders::BOTTOM).title("Filtros"))
    }

    fn draw_table(&self) -> Table<'static> {
        let header = Row::new(
            ["BDNS", "Fecha", "Descripción", "Presupuesto", "Órgano", "Región", "Sector", "Estado"]
                .map(|title| Cell::from(title)),
        )
        .style(
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        );

        let rows: Vec<Row> = self
            .filtered
            .iter()
            .map(|row| {
                Row::new(vec![
                    Cell::from(row.codigo_bdns.to_string()),
                    Cell::from(row.fecha_recepcion.to_string()),
                    Cell::from(clip(row.descripcion.as_deref().unwrap_or(""), 60)),
                    Cell::from(
                        row.presupuesto_total
                            .map(format_euros)
                            .unwrap_or_default(),
                    ),
                    Cell::from(clip(row.organo_nivel1.as_deref().unwrap_or(""), 30)),
                    Cell::from(clip(row.region.as_deref().unwrap_or(""), 18)),
                    Cell::from(clip(row.sector.as_deref().unwrap_or(""), 24)),
                    Cell::from(match row.abierto {
                        Some(true) => "abierta",
                        Some(false) => "cerrada",
                        None => "",
                    }),
                ])
            })
            .collect();

        let order = if self.sort_desc { "desc" } else { "asc" };
        Table::new(
            rows,
            [
                Constraint::Length(8),
                Constraint::Length(10),
                Constraint::Min(30),
                Constraint::Length(14),
                Constraint::Length(30),
                Constraint::Length(18),
                Constraint::Length(24),
                Constraint::Length(8),
            ],
        )
        .header(header)
        .row_highlight_style(Style::default().add_modifier(Modifier::REVERSED))
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(format!("Resultados ({} · {})", self.sort.label(), order)),
        )
    }

    fn draw_stats(&self, frame: &mut ratatui::Frame) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Length(3), Constraint::Min(4)])
            .split(frame.area());

        frame.render_widget(draw_header("ESTADÍSTICAS POR AÑO"), chunks[0]);

        let header = Row::new(
            ["Año", "Filas", "BDNS únicos", "Presupuesto total", "Medio", "Abiertas", "Cerradas"]
                .map(Cell::from),
        )
        .style(
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        );
        let rows: Vec<Row> = self
            .year_stats
            .iter()
            .map(|stat| {
                Row::new(vec![
                    Cell::from(stat.year.to_string()),
                    Cell::from(stat.rows.to_string()),
                    Cell::from(stat.unique_ids.to_string()),
                    Cell::from(format_euros(stat.total_budget)),
                    Cell::from(
                        stat.mean_budget
                            .map(format_euros)
                            .unwrap_or_else(|| "n/a".to_string()),
                    ),
                    Cell::from(stat.open.to_string()),
                    Cell::from(stat.closed.to_string()),
                ])
            })
            .collect();
        let table = Table::new(
            rows,
            [
                Constraint::Length(6),
                Constraint::Length(10),
                Constraint::Length(12),
                Constraint::Length(18),
                Constraint::Length(14),
                Constraint::Length(9),
                Constraint::Length(9),
            ],
        )
        .header(header)
        .block(Block::default().borders(Borders::ALL));
        frame.render_widget(table, chunks[1]);
    }
}

fn draw_header(title: &str) -> Paragraph<'static> {
    Paragraph::new(Line::from(format!("BDNS HARVESTER :: {title}")))
        .block(Block::default().borders(Borders::BOTTOM))
        .alignment(Alignment::Left)
        .style(
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        )
}

fn draw_help(frame: &mut ratatui::Frame) {
    let lines = vec![
        Line::from("F1 ayuda   F2 estadísticas   F3 tabla   ESC salir"),
        Line::from(""),
        Line::from("TAB / Shift+TAB  cambiar de filtro"),
        Line::from("ENTER            aplicar filtros"),
        Line::from("F8               limpiar todos los filtros"),
        Line::from("F4 / F5          columna de orden / dirección"),
        Line::from(format!("F6               exportar subset a {EXPORT_FILE}")),
        Line::from("↑ ↓ PgUp PgDn    desplazarse por la tabla"),
        Line::from(""),
        Line::from("Año y BDNS aceptan listas separadas por comas."),
        Line::from("Estado: 'abierta' o 'cerrada'. Fechas: AAAA-MM-DD."),
    ];
    let help = Paragraph::new(lines)
        .block(Block::default().borders(Borders::ALL).title("Ayuda"))
        .alignment(Alignment::Left);
    frame.render_widget(help, frame.area());
}

fn csv_list(input: &str) -> Vec<String> {
    input
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

fn non_empty(input: &str) -> Option<String> {
    if input.is_empty() {
        None
    } else {
        Some(input.to_string())
    }
}

fn parse_status(input: &str) -> Option<bool> {
    match input.to_lowercase().as_str() {
        "abierta" | "abiertas" | "open" | "si" | "sí" => Some(true),
        "cerrada" | "cerradas" | "closed" | "no" => Some(false),
        _ => None,
    }
}

fn format_euros(value: f64) -> String {
    format!("€{value:.0}")
}

fn clip(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let clipped: String = text.chars().take(max_chars.saturating_sub(1)).collect();
    format!("{clipped}…")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_input_parsing() {
        assert_eq!(parse_status("abiertas"), Some(true));
        assert_eq!(parse_status("CERRADA"), Some(false));
        assert_eq!(parse_status(""), None);
        assert_eq!(parse_status("todas"), None);
    }

    #[test]
    fn comma_lists_ignore_blanks() {
        assert_eq!(csv_list("865179, 865180,,"), vec!["865179", "865180"]);
        assert!(csv_list("  ").is_empty());
    }

    #[test]
    fn clipping_preserves_short_text() {
        assert_eq!(clip("corto", 10), "corto");
        assert_eq!(clip("una descripción muy larga", 10), "una descr…");
    }
}
