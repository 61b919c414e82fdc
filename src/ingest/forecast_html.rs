/// GLOFAS forecast page parser.
///
/// The forecasting service publishes per-station forecasts as an HTML
/// fragment rather than an API payload. This module is a pure structural
/// extractor over that markup: it locates five required anchors and copies
/// their cell text out verbatim. No numeric coercion happens here — value
/// typing belongs to the trigger evaluator, which keeps this parser usable
/// as a traceability record of exactly what the page said.
///
/// Required anchors:
///   - three return-period tables, recognized by a recurrence marker in the
///     header row ("2-year return period", 5-year, 20-year)
///   - one point-forecast table, recognized by its "Max. probability" header
///   - one hydrograph `<img>` (src contains "hydrograph")
///
/// Upstream routinely omits sections when no forecast exists for a station.
/// Partial data is worse than none for a threshold evaluator, so a page
/// missing ANY anchor — or carrying a recognized table with too few rows —
/// yields the "no data" outcome, never a partially populated bundle.

// ---------------------------------------------------------------------------
// Bundle types
// ---------------------------------------------------------------------------

/// One return-period table: header row plus the five most recent forecast
/// days (most recent first, as published), cells preserved as raw text in
/// column order.
#[derive(Debug, Clone, PartialEq)]
pub struct ReturnPeriodTable {
    pub recurrence_years: u8,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// The single-row point forecast, read positionally by column index and
/// paired with its header text.
#[derive(Debug, Clone, PartialEq)]
pub struct PointForecast {
    pub headers: Vec<String>,
    pub forecast_date: String,
    pub max_probability: String,
    pub alert_level: String,
    pub probability_step: String,
    pub image_reference: String,
    pub peak_forecast: String,
}

/// Typed output of parsing one forecast page.
#[derive(Debug, Clone, PartialEq)]
pub struct ForecastBundle {
    /// Exactly three tables, ordered 2 / 5 / 20 year recurrence.
    pub return_periods: Vec<ReturnPeriodTable>,
    pub point_forecast: PointForecast,
    pub hydrograph_image: String,
}

/// Recurrence intervals the page must carry, in publication order.
const RETURN_PERIOD_YEARS: [u8; 3] = [2, 5, 20];

/// Data rows expected under a return-period header.
const RETURN_PERIOD_ROWS: usize = 5;

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Parses one forecast page. Returns `None` when any required anchor is
/// missing or malformed — the legitimate "no forecast published" outcome.
///
/// Pure function of the input text: the same markup always yields an
/// identical bundle.
pub fn parse_forecast_page(html: &str) -> Option<ForecastBundle> {
    let tables = extract_tables(html);

    let mut return_periods = Vec::with_capacity(RETURN_PERIOD_YEARS.len());
    for years in RETURN_PERIOD_YEARS {
        return_periods.push(find_return_period_table(&tables, years)?);
    }

    let point_forecast = find_point_forecast(&tables)?;
    let hydrograph_image = find_hydrograph_image(html)?;

    Some(ForecastBundle {
        return_periods,
        point_forecast,
        hydrograph_image,
    })
}

// ---------------------------------------------------------------------------
// Anchor recognition
// ---------------------------------------------------------------------------

fn find_return_period_table(tables: &[Vec<Vec<String>>], years: u8) -> Option<ReturnPeriodTable> {
    let marker = format!("{} year return period", years);
    let table = tables
        .iter()
        .find(|rows| header_text(rows).contains(&marker))?;

    // Header row plus the five most recent forecast days. A recognized but
    // truncated table means the page is mid-publication — treat as no data.
    if table.len() < 1 + RETURN_PERIOD_ROWS {
        return None;
    }
    Some(ReturnPeriodTable {
        recurrence_years: years,
        headers: table[0].clone(),
        rows: table[1..=RETURN_PERIOD_ROWS].to_vec(),
    })
}

fn find_point_forecast(tables: &[Vec<Vec<String>>]) -> Option<PointForecast> {
    let table = tables
        .iter()
        .find(|rows| header_text(rows).contains("max probability"))?;

    // Exactly one data row, read positionally: date, max probability, alert
    // level, probability step, image reference, peak forecast.
    let row = table.get(1)?;
    if row.len() < 6 {
        return None;
    }
    Some(PointForecast {
        headers: table[0].clone(),
        forecast_date: row[0].clone(),
        max_probability: row[1].clone(),
        alert_level: row[2].clone(),
        probability_step: row[3].clone(),
        image_reference: row[4].clone(),
        peak_forecast: row[5].clone(),
    })
}

fn find_hydrograph_image(html: &str) -> Option<String> {
    let lower = html.to_ascii_lowercase();
    let mut pos = 0;
    while let Some(rel) = lower[pos..].find("<img") {
        let start = pos + rel;
        let end = lower[start..].find('>').map(|e| start + e)?;
        let tag = &html[start..=end];
        if let Some(src) = extract_attr(tag, "src") {
            if src.to_ascii_lowercase().contains("hydrograph") {
                return Some(src);
            }
        }
        pos = end + 1;
    }
    None
}

/// Joined, normalized text of a table's header row. Lowercased with dashes
/// and dots folded away so "2-Year Return Period" and "Max. Probability"
/// both match their markers.
fn header_text(rows: &[Vec<String>]) -> String {
    let joined = match rows.first() {
        Some(header) => header.join(" "),
        None => return String::new(),
    };
    let folded: String = joined
        .chars()
        .map(|c| if c == '-' { ' ' } else { c })
        .filter(|c| *c != '.')
        .collect();
    folded
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

// ---------------------------------------------------------------------------
// Structural extraction
// ---------------------------------------------------------------------------

/// Extracts every `<table>` as rows of cell text, in document order.
/// Tolerates attributes and mixed case; does not attempt nested tables
/// (the upstream page has none).
fn extract_tables(html: &str) -> Vec<Vec<Vec<String>>> {
    let lower = html.to_ascii_lowercase();
    let mut tables = Vec::new();
    let mut pos = 0;

    while let Some(rel) = lower[pos..].find("<table") {
        let open_start = pos + rel;
        let body_start = match lower[open_start..].find('>') {
            Some(e) => open_start + e + 1,
            None => break,
        };
        let body_end = match lower[body_start..].find("</table") {
            Some(e) => body_start + e,
            None => break,
        };
        tables.push(extract_rows(&html[body_start..body_end]));
        pos = body_end + "</table".len();
    }
    tables
}

fn extract_rows(table_body: &str) -> Vec<Vec<String>> {
    let lower = table_body.to_ascii_lowercase();
    let mut rows = Vec::new();
    let mut pos = 0;

    while let Some(rel) = lower[pos..].find("<tr") {
        let open_start = pos + rel;
        let body_start = match lower[open_start..].find('>') {
            Some(e) => open_start + e + 1,
            None => break,
        };
        let body_end = lower[body_start..]
            .find("</tr")
            .map(|e| body_start + e)
            .unwrap_or(table_body.len());
        rows.push(extract_cells(&table_body[body_start..body_end]));
        pos = body_end.max(body_start);
        match lower[pos..].find('>') {
            Some(e) => pos += e + 1,
            None => break,
        }
    }
    rows
}

fn extract_cells(row_body: &str) -> Vec<String> {
    let lower = row_body.to_ascii_lowercase();
    let mut cells = Vec::new();
    let mut pos = 0;

    loop {
        let td = lower[pos..].find("<td");
        let th = lower[pos..].find("<th");
        let (rel, close_tag) = match (td, th) {
            (Some(a), Some(b)) if a < b => (a, "</td"),
            (Some(a), None) => (a, "</td"),
            (_, Some(b)) => (b, "</th"),
            (None, None) => break,
        };
        let open_start = pos + rel;
        let body_start = match lower[open_start..].find('>') {
            Some(e) => open_start + e + 1,
            None => break,
        };
        let body_end = lower[body_start..]
            .find(close_tag)
            .map(|e| body_start + e)
            .unwrap_or(row_body.len());
        cells.push(cell_text(&row_body[body_start..body_end]));
        pos = body_end;
    }
    cells
}

/// Strips markup from a cell and collapses whitespace, decoding the handful
/// of entities the upstream page uses.
fn cell_text(cell_html: &str) -> String {
    let mut text = String::with_capacity(cell_html.len());
    let mut in_tag = false;
    for c in cell_html.chars() {
        match c {
            '<' => in_tag = true,
            '>' => {
                if in_tag {
                    in_tag = false;
                } else {
                    text.push(c);
                }
            }
            _ if !in_tag => text.push(c),
            _ => {}
        }
    }

    let decoded = text
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'");

    decoded.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn extract_attr(tag: &str, attr: &str) -> Option<String> {
    let lower = tag.to_ascii_lowercase();
    let needle = format!("{}=", attr);
    let attr_pos = lower.find(&needle)? + needle.len();
    let rest = &tag[attr_pos..];
    let mut chars = rest.chars();
    match chars.next()? {
        quote @ ('"' | '\'') => {
            let inner = &rest[1..];
            let end = inner.find(quote)?;
            Some(inner[..end].to_string())
        }
        _ => {
            let end = rest
                .find(|c: char| c.is_whitespace() || c == '>')
                .unwrap_or(rest.len());
            Some(rest[..end].to_string())
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
