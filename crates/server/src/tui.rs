use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Gauge, Paragraph};
use ratatui::Frame;

use friendlink::{unpack_string, Location, PacketType, PropertyStream, PropertyTag};

use crate::events::ServerEvent;

/// One dashboard row per slot, fed by relayed property streams.
#[derive(Debug, Clone, Default)]
struct ClientRow {
    connected: bool,
    name: String,
    world_space: String,
    cell: String,
    position: String,
}

pub struct Dashboard {
    title: String,
    max_clients: u8,
    rows: Vec<ClientRow>,
    client_count: usize,
    last_error: Option<String>,
}

impl Dashboard {
    pub fn new(title: String, max_clients: u8) -> Self {
        Self {
            title,
            max_clients,
            rows: vec![ClientRow::default(); max_clients as usize],
            client_count: 0,
            last_error: None,
        }
    }

    pub fn apply(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::ClientJoined { slot, .. } => {
                if let Some(row) = self.rows.get_mut(slot as usize) {
                    *row = ClientRow {
                        connected: true,
                        ..ClientRow::default()
                    };
                }
                self.client_count = self.rows.iter().filter(|r| r.connected).count();
            }
            ServerEvent::ClientLeft { slot } => {
                if let Some(row) = self.rows.get_mut(slot as usize) {
                    *row = ClientRow::default();
                }
                self.client_count = self.rows.iter().filter(|r| r.connected).count();
            }
            ServerEvent::Relayed(packet) => {
                if packet.packet_type() != PacketType::Properties {
                    return;
                }
                let Some(row) = self.rows.get_mut(packet.client() as usize) else {
                    return;
                };
                let stream = PropertyStream::from_bytes(packet.into_data());
                for property in &stream {
                    let property = match property {
                        Ok(property) => property,
                        Err(e) => {
                            log::warn!("dashboard dropped a property stream: {e}");
                            break;
                        }
                    };
                    match property.tag {
                        PropertyTag::Name => row.name = unpack_string(&property),
                        PropertyTag::CellName => row.cell = unpack_string(&property),
                        PropertyTag::WorldSpaceName => {
                            row.world_space = unpack_string(&property)
                        }
                        PropertyTag::Location => {
                            if let Ok(location) = Location::from_property(&property) {
                                row.position = location.to_string();
                            }
                        }
                        _ => {}
                    }
                }
            }
            ServerEvent::Error(message) => self.last_error = Some(message),
        }
    }
}

pub fn render(frame: &mut Frame, dashboard: &Dashboard) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .margin(1)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(dashboard.max_clients as u16 + 2),
            Constraint::Length(3),
            Constraint::Length(1),
        ])
        .split(frame.area());

    render_header(frame, chunks[0], dashboard);
    render_clients(frame, chunks[1], dashboard);
    render_error(frame, chunks[2], dashboard);
    render_help(frame, chunks[3]);
}

fn render_header(frame: &mut Frame, area: Rect, dashboard: &Dashboard) {
    let block = Block::default()
        .title(format!(" {} ", dashboard.title))
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan));

    let ratio = if dashboard.max_clients == 0 {
        0.0
    } else {
        dashboard.client_count as f64 / dashboard.max_clients as f64
    };
    let gauge = Gauge::default()
        .block(block)
        .gauge_style(Style::default().fg(Color::Green))
        .ratio(ratio.min(1.0))
        .label(format!(
            "{}/{} clients",
            dashboard.client_count, dashboard.max_clients
        ));

    frame.render_widget(gauge, area);
}

fn render_clients(frame: &mut Frame, area: Rect, dashboard: &Dashboard) {
    let block = Block::default()
        .title(" Clients ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Green));

    let mut lines = Vec::with_capacity(dashboard.rows.len());
    for (slot, row) in dashboard.rows.iter().enumerate() {
        if row.connected {
            lines.push(Line::from(vec![
                Span::styled(format!("{slot:>3}  "), Style::default().fg(Color::Gray)),
                Span::styled(
                    format!("{:<16}", row.name),
                    Style::default().fg(Color::White),
                ),
                Span::styled(
                    format!("{:<16}", row.world_space),
                    Style::default().fg(Color::White),
                ),
                Span::styled(
                    format!("{:<16}", row.cell),
                    Style::default().fg(Color::White),
                ),
                Span::styled(row.position.clone(), Style::default().fg(Color::White)),
            ]));
        } else {
            lines.push(Line::from(Span::styled(
                format!("{slot:>3}  -"),
                Style::default().fg(Color::DarkGray),
            )));
        }
    }

    frame.render_widget(Paragraph::new(lines).block(block), area);
}

fn render_error(frame: &mut Frame, area: Rect, dashboard: &Dashboard) {
    let block = Block::default()
        .title(" Last Error ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Yellow));

    let text = dashboard.last_error.as_deref().unwrap_or("none");
    let color = if dashboard.last_error.is_some() {
        Color::Red
    } else {
        Color::DarkGray
    };
    frame.render_widget(
        Paragraph::new(text.to_string())
            .block(block)
            .style(Style::default().fg(color)),
        area,
    );
}

fn render_help(frame: &mut Frame, area: Rect) {
    frame.render_widget(
        Paragraph::new("Press 'q' or ESC to quit").style(
            Style::default()
                .fg(Color::DarkGray)
                .add_modifier(Modifier::ITALIC),
        ),
        area,
    );
}
