//! Deck Builder: walks the declared `deck`, producing for each block the
//! rendered series, tables, x-axis labels, and attached annotations. The
//! output `Deck` is the stable, render-agnostic JSON document a separate
//! chart renderer consumes — this module never draws anything.

use serde::Serialize;

use crate::annotations::ResolvedAnnotations;
use crate::axis::{compute_scale, AxisScale};
use crate::config::{Config, RawBlock, RawTableRow};
use crate::error::EngineResult;
use crate::formatter::Mask;
use crate::metrics::engine::MetricEngine;
use crate::metrics::rollup::{Rollup, RollupValue};

/// The full deck document, JSON-serializable and handed to the renderer
/// unchanged.
#[derive(Debug, Clone, Serialize)]
pub struct Deck {
    pub title: String,
    #[serde(rename = "weekEnding")]
    pub week_ending: String,
    #[serde(rename = "blockStartingNumber")]
    pub block_starting_number: u32,
    #[serde(rename = "xAxisMonthlyDisplay")]
    pub x_axis_monthly_display: String,
    #[serde(rename = "eventErrors")]
    pub event_errors: Vec<String>,
    pub blocks: Vec<BlockDocument>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum BlockDocument {
    Graph(GraphBlock),
    Table(TableBlock),
    Section(SectionBlock),
    Embedded(EmbeddedBlock),
}

#[derive(Debug, Clone, Serialize)]
pub struct GraphBlock {
    #[serde(rename = "plotStyle")]
    pub plot_style: &'static str,
    pub title: String,
    #[serde(rename = "blockNumber", skip_serializing_if = "Option::is_none")]
    pub block_number: Option<u32>,
    #[serde(rename = "yScale")]
    pub y_scale: String,
    #[serde(rename = "boxTotalScale")]
    pub box_total_scale: String,
    pub tooltip: bool,
    pub axes: u8,
    #[serde(rename = "xAxis")]
    pub x_axis: Vec<String>,
    #[serde(rename = "axisScale", skip_serializing_if = "Option::is_none")]
    pub axis_scale: Option<AxisScaleDoc>,
    #[serde(rename = "yAxis")]
    pub y_axis: Vec<YAxisSeries>,
    pub table: SummaryTable,
    #[serde(rename = "noteworthyEvents")]
    pub noteworthy_events: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AxisScaleDoc {
    pub min: f64,
    pub max: f64,
    pub tick: f64,
}

impl From<AxisScale> for AxisScaleDoc {
    fn from(s: AxisScale) -> Self {
        Self {
            min: s.min,
            max: s.max,
            tick: s.tick,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct YAxisSeries {
    #[serde(rename = "legendName")]
    pub legend_name: String,
    #[serde(rename = "lineStyle")]
    pub line_style: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metric: Option<CurrentPrevious>,
    #[serde(rename = "Target", skip_serializing_if = "Option::is_none")]
    pub target: Option<TargetSeries>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CurrentPrevious {
    pub current: [AxisSlot; 2],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous: Option<[AxisSlot; 2]>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TargetSeries {
    pub current: [AxisSlot; 2],
}

/// One of the two 19-slot arrays making up a 6/12 chart series: weekly
/// values live in `primaryAxis` at positions 0..5, monthly values live in
/// `secondaryAxis` at positions 7..18; the other slots are `null`.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum AxisSlot {
    Primary { #[serde(rename = "primaryAxis")] primary_axis: [Option<f64>; 19] },
    Secondary { #[serde(rename = "secondaryAxis")] secondary_axis: [Option<f64>; 19] },
}

#[derive(Debug, Clone, Serialize)]
pub struct SummaryTable {
    #[serde(rename = "tableHeader")]
    pub table_header: [&'static str; 9],
    #[serde(rename = "tableBody")]
    pub table_body: Vec<[String; 9]>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TableBlock {
    #[serde(rename = "plotStyle")]
    pub plot_style: &'static str,
    pub title: String,
    #[serde(rename = "blockNumber", skip_serializing_if = "Option::is_none")]
    pub block_number: Option<u32>,
    pub headers: Vec<String>,
    pub rows: Vec<TableRowDoc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TableRowDoc {
    #[serde(rename = "rowHeader")]
    pub row_header: String,
    #[serde(rename = "rowStyle")]
    pub row_style: Option<String>,
    #[serde(rename = "yScale")]
    pub y_scale: String,
    #[serde(rename = "rowData")]
    pub row_data: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SectionBlock {
    #[serde(rename = "plotStyle")]
    pub plot_style: &'static str,
    pub title: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmbeddedBlock {
    #[serde(rename = "plotStyle")]
    pub plot_style: &'static str,
    pub id: String,
    pub source: String,
    pub title: String,
    pub width: u32,
    pub height: u32,
}

const TABLE_HEADER: [&str; 9] = [
    "Metric", "LastWeek", "LastWeek YOY", "MTD", "MTD YOY", "QTD", "QTD YOY", "YTD", "YTD YOY",
];

/// Builds the whole deck document from a validated config and an already
/// build `MetricEngine`.
pub fn build_deck(
    config: &Config,
    engine: &mut MetricEngine,
    annotations: &ResolvedAnnotations,
) -> EngineResult<Deck> {
    let mut counter = config.block_starting_number;
    let mut blocks = Vec::with_capacity(config.deck.len());
    let x_axis_monthly_display = config
        .deck
        .iter()
        .find_map(|b| b.x_axis_monthly_display.clone())
        .unwrap_or_else(|| "trailing_twelve_months".to_string());

    for raw in &config.deck {
        let doc = match raw.ui_type.as_str() {
            "6_12Graph" => {
                let number = counter;
                counter += 1;
                BlockDocument::Graph(build_graph_block(raw, engine, annotations, number)?)
            }
            "6_WeeksTable" => {
                let number = counter;
                counter += 1;
                BlockDocument::Table(build_weeks_table(raw, engine, number)?)
            }
            "12_MonthsTable" => {
                let number = counter;
                counter += 1;
                BlockDocument::Table(build_months_table(raw, engine, number)?)
            }
            "section" => BlockDocument::Section(SectionBlock {
                plot_style: "section",
                title: raw.title.clone().unwrap_or_default(),
            }),
            "embedded_content" => BlockDocument::Embedded(EmbeddedBlock {
                plot_style: "embedded_content",
                id: raw.id.clone().unwrap_or_default(),
                source: raw.source.clone().unwrap_or_default(),
                title: raw.title.clone().unwrap_or_default(),
                width: raw.width.unwrap_or(0),
                height: raw.height.unwrap_or(0),
            }),
            other => {
                return Err(crate::error::EngineError::Internal(format!(
                    "unreachable: uiType {other:?} should have been rejected by the validator"
                )))
            }
        };
        blocks.push(doc);
    }

    Ok(Deck {
        title: config.title.clone(),
        week_ending: config.week_ending.format("%d-%b-%Y").to_string(),
        block_starting_number: config.block_starting_number,
        x_axis_monthly_display,
        event_errors: annotations.event_errors.clone(),
        blocks,
    })
}

fn build_graph_block(
    raw: &RawBlock,
    engine: &mut MetricEngine,
    annotations: &ResolvedAnnotations,
    number: u32,
) -> EngineResult<GraphBlock> {
    let mask = raw
        .y_scaling
        .as_deref()
        .map(Mask::parse)
        .transpose()
        .map_err(|e| crate::error::EngineError::Internal(e))?
        .unwrap_or(Mask::DEFAULT);

    let mut y_axis = Vec::with_capacity(raw.y_axis.len());
    let mut table_body = Vec::new();
    let mut noteworthy_events = Vec::new();
    let mut data_points: Vec<f64> = Vec::new();
    // First-wins on a repeated lineStyle — the rest still render, matching
    // the distilled spec's Open Question resolution.
    let axes: u8 = if raw.y_axis.iter().any(|e| e.line_style == "secondary") {
        2
    } else {
        1
    };

    for entry in &raw.y_axis {
        let rollup = engine.rollup_for(&entry.metric)?;
        collect_finite(&rollup, &mut data_points);

        if entry.line_style == "target" {
            y_axis.push(YAxisSeries {
                legend_name: entry.legend_name.clone(),
                line_style: entry.line_style.clone(),
                metric: None,
                target: Some(TargetSeries {
                    current: chart_slots(&rollup),
                }),
            });
            continue;
        }

        let previous = raw.graph_prior_year_flag.then(|| chart_slots_py(&rollup));
        y_axis.push(YAxisSeries {
            legend_name: entry.legend_name.clone(),
            line_style: entry.line_style.clone(),
            metric: Some(CurrentPrevious {
                current: chart_slots(&rollup),
                previous,
            }),
            target: None,
        });

        table_body.push(table_row(&entry.metric, &rollup, engine, mask));

        if let Some(annotation) = annotations.by_metric.get(&entry.metric) {
            noteworthy_events.push(format!(
                "{}: {}",
                annotation.date.format("%d-%b-%Y"),
                annotation.event_description
            ));
        }
    }

    let axis_scale = if data_points.len() >= 2 {
        let min = data_points.iter().cloned().fold(f64::INFINITY, f64::min);
        let max = data_points.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        Some(compute_scale(min, max).into())
    } else {
        None
    };

    Ok(GraphBlock {
        plot_style: "6_12_chart",
        title: raw.title.clone().unwrap_or_default(),
        block_number: Some(number),
        y_scale: mask.to_mask_string(),
        box_total_scale: mask.to_mask_string(),
        tooltip: false,
        axes,
        x_axis: engine.calendar().x_axis_labels().to_vec(),
        axis_scale,
        y_axis,
        table: SummaryTable {
            table_header: TABLE_HEADER,
            table_body,
        },
        noteworthy_events,
    })
}

fn collect_finite(rollup: &Rollup, out: &mut Vec<f64>) {
    for v in rollup.weekly_cy.iter().chain(rollup.monthly_cy.iter()) {
        if let Some(f) = v.as_option() {
            out.push(f);
        }
    }
}

/// Builds the 19-slot `[primaryAxis weeks | gap | secondaryAxis months]`
/// pair for the current year.
fn chart_slots(rollup: &Rollup) -> [AxisSlot; 2] {
    let mut primary = [None; 19];
    for (i, v) in rollup.weekly_cy.iter().enumerate() {
        primary[i] = v.as_option();
    }
    let mut secondary = [None; 19];
    for (i, v) in rollup.monthly_cy.iter().enumerate() {
        secondary[7 + i] = v.as_option();
    }
    [
        AxisSlot::Primary { primary_axis: primary },
        AxisSlot::Secondary { secondary_axis: secondary },
    ]
}

fn chart_slots_py(rollup: &Rollup) -> [AxisSlot; 2] {
    let mut primary = [None; 19];
    for (i, v) in rollup.weekly_py.iter().enumerate() {
        primary[i] = v.as_option();
    }
    let mut secondary = [None; 19];
    for (i, v) in rollup.monthly_py.iter().enumerate() {
        secondary[7 + i] = v.as_option();
    }
    [
        AxisSlot::Primary { primary_axis: primary },
        AxisSlot::Secondary { secondary_axis: secondary },
    ]
}

/// One `tableBody` row for a 6/12 block: `[name, LastWeek, YOY, MTD, YOY,
/// QTD, YOY, YTD, YOY]`.
fn table_row(metric_name: &str, rollup: &Rollup, engine: &mut MetricEngine, mask: Mask) -> [String; 9] {
    let comparison = engine.comparison_method(metric_name);
    let yoy_name = format!("{metric_name}YOY");
    let yoy = engine.rollup_for(&yoy_name).ok();

    let yoy_value = |field: fn(&Rollup) -> RollupValue| {
        yoy.as_ref()
            .map(|r| comparison.format(field(r).as_option()))
            .unwrap_or_else(|| "N/A".to_string())
    };

    [
        metric_name.to_string(),
        mask.format(rollup.weekly_cy[5].as_option()),
        yoy_value(|r| r.weekly_cy[5]),
        mask.format(rollup.mtd_cy.as_option()),
        yoy_value(|r| r.mtd_cy),
        mask.format(rollup.qtd_cy.as_option()),
        yoy_value(|r| r.qtd_cy),
        mask.format(rollup.ytd_cy.as_option()),
        yoy_value(|r| r.ytd_cy),
    ]
}

fn build_weeks_table(raw: &RawBlock, engine: &mut MetricEngine, number: u32) -> EngineResult<TableBlock> {
    let week_labels = weekly_headers(engine);
    let mut headers: Vec<String> = week_labels.to_vec();
    headers.push("QTD".to_string());
    headers.push("YTD".to_string());

    let mut rows = Vec::with_capacity(raw.rows.len());
    for row in &raw.rows {
        rows.push(build_table_row(row, engine, 8)?);
    }

    Ok(TableBlock {
        plot_style: "6_WeeksTable",
        title: raw.title.clone().unwrap_or_default(),
        block_number: Some(number),
        headers,
        rows,
    })
}

fn build_months_table(raw: &RawBlock, engine: &mut MetricEngine, number: u32) -> EngineResult<TableBlock> {
    let headers: Vec<String> = engine
        .calendar()
        .x_axis_labels()
        .into_iter()
        .skip(7)
        .collect();

    let mut rows = Vec::with_capacity(raw.rows.len());
    for row in &raw.rows {
        rows.push(build_table_row(row, engine, 12)?);
    }

    Ok(TableBlock {
        plot_style: "12_MonthsTable",
        title: raw.title.clone().unwrap_or_default(),
        block_number: Some(number),
        headers,
        rows,
    })
}

fn weekly_headers(engine: &MetricEngine) -> [String; 6] {
    let all = engine.calendar().x_axis_labels();
    std::array::from_fn(|i| all[i].clone())
}

fn build_table_row(row: &RawTableRow, engine: &mut MetricEngine, width: usize) -> EngineResult<TableRowDoc> {
    let Some(metric_name) = &row.metric else {
        return Ok(TableRowDoc {
            row_header: row.row_header.clone(),
            row_style: row.row_style.clone(),
            y_scale: Mask::DEFAULT.to_mask_string(),
            row_data: vec!["N/A".to_string(); width],
        });
    };

    let rollup = engine.rollup_for(metric_name)?;
    let mask = Mask::DEFAULT;
    let row_data = if width == 8 {
        let mut data: Vec<String> = rollup
            .weekly_cy
            .iter()
            .map(|v| mask.format(v.as_option()))
            .collect();
        data.push(mask.format(rollup.qtd_cy.as_option()));
        data.push(mask.format(rollup.ytd_cy.as_option()));
        data
    } else {
        rollup
            .monthly_cy
            .iter()
            .map(|v| mask.format(v.as_option()))
            .collect()
    };

    Ok(TableRowDoc {
        row_header: row.row_header.clone(),
        row_style: row.row_style.clone(),
        y_scale: mask.to_mask_string(),
        row_data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load;
    use crate::metrics::table::{CellValue, DailyTable};
    use chrono::NaiveDate;
    use std::collections::BTreeMap;

    fn build_table(column: &str, start: NaiveDate, values: &[f64]) -> DailyTable {
        let mut table = DailyTable::new(vec![column.to_string()]);
        for (i, v) in values.iter().enumerate() {
            let mut row = BTreeMap::new();
            row.insert(column.to_string(), CellValue::Number(*v));
            table.push_row(start + chrono::Duration::days(i as i64), row);
        }
        table
    }

    fn scenario_one_yaml() -> &'static str {
        r#"
setup:
  weekEnding: 25-SEP-2021
metrics:
  Impressions:
    column: Impressions
    aggf: sum
deck:
  - uiType: 6_12Graph
    title: Impressions
    yScaling: "##.2MM"
    yAxis:
      - legendName: Impressions
        metric: Impressions
        lineStyle: primary
"#
    }

    #[test]
    fn basic_graph_block_has_19_label_x_axis_and_one_table_row() {
        let config = load(scenario_one_yaml()).unwrap();
        let start = NaiveDate::from_ymd_opt(2019, 9, 27).unwrap();
        let values: Vec<f64> = (1..=730).map(|n| n as f64 * 1_000_000.0).collect();
        let table = build_table("Impressions", start, &values);
        let mut engine = MetricEngine::build(&config, &table).unwrap();
        let annotations = ResolvedAnnotations::default();

        let deck = build_deck(&config, &mut engine, &annotations).unwrap();
        assert_eq!(deck.blocks.len(), 1);
        match &deck.blocks[0] {
            BlockDocument::Graph(g) => {
                assert_eq!(g.x_axis.len(), 19);
                assert_eq!(g.table.table_body.len(), 1);
                assert_eq!(g.block_number, Some(1));
            }
            _ => panic!("expected a graph block"),
        }
    }

    #[test]
    fn block_numbering_starts_at_configured_number_and_skips_sections() {
        let yaml = r#"
setup:
  weekEnding: 25-SEP-2021
  blockStartingNumber: 5
metrics:
  Impressions:
    column: Impressions
    aggf: sum
deck:
  - uiType: section
    title: Overview
  - uiType: 6_12Graph
    yAxis:
      - legendName: Impressions
        metric: Impressions
        lineStyle: primary
  - uiType: 6_12Graph
    yAxis:
      - legendName: Impressions
        metric: Impressions
        lineStyle: primary
"#;
        let config = load(yaml).unwrap();
        let start = NaiveDate::from_ymd_opt(2019, 9, 27).unwrap();
        let values: Vec<f64> = (1..=730).map(|n| n as f64).collect();
        let table = build_table("Impressions", start, &values);
        let mut engine = MetricEngine::build(&config, &table).unwrap();
        let annotations = ResolvedAnnotations::default();

        let deck = build_deck(&config, &mut engine, &annotations).unwrap();
        let numbers: Vec<Option<u32>> = deck
            .blocks
            .iter()
            .map(|b| match b {
                BlockDocument::Graph(g) => g.block_number,
                BlockDocument::Section(_) => None,
                _ => None,
            })
            .collect();
        assert_eq!(numbers, vec![None, Some(5), Some(6)]);
    }
}
