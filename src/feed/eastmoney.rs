//! Eastmoney free-feed adapter.
//!
//! Wraps the public push2/push2his/datacenter JSON endpoints behind the
//! [`MarketFeed`] trait. Key properties:
//!
//! - **Uniform columnar output** — every method returns a frame with the
//!   canonical column names documented on the trait, built by naming-based
//!   field lookup so upstream additions are harmless.
//! - **Drift detection** — a required field missing from every row raises
//!   `SchemaDrift`; unexpected fields are logged at debug and ignored.
//! - **No throttling here** — the [`gate::GatedFeed`](super::gate::GatedFeed)
//!   decorator owns rate limiting and retry; this type only maps transport
//!   and payload failures onto the error taxonomy.

use chrono::{NaiveDate, NaiveDateTime};
use polars::prelude::*;
use reqwest::Client;
use serde_json::{Map, Value};

use async_trait::async_trait;

use crate::error::{SyncError, SyncResult};
use crate::feed::MarketFeed;

const PUSH2: &str = "https://push2.eastmoney.com";
const PUSH2HIS: &str = "https://push2his.eastmoney.com";
const PUSH2EX: &str = "https://push2ex.eastmoney.com";
const DATACENTER: &str = "https://datacenter-web.eastmoney.com";
const NEWS_API: &str = "https://np-listapi.eastmoney.com";

const TIMEOUT_SECS: u64 = 30;
const LIST_PAGE_SIZE: u32 = 10_000;

/// Screener filter covering SH/SZ main boards, ChiNext, STAR and BSE stocks.
const FS_STOCKS: &str = "m:0+t:6,m:0+t:80,m:1+t:2,m:1+t:23,m:0+t:81+s:2048";
/// Exchange-traded funds on both exchanges.
const FS_ETFS: &str = "b:MK0021,b:MK0022,b:MK0023,b:MK0024";
/// Industry and concept boards.
const FS_INDUSTRY_BOARDS: &str = "m:90+t:2";
const FS_CONCEPT_BOARDS: &str = "m:90+t:3";

/// Daily kline payload is positional; this is the upstream column order for
/// `fields2=f51..f61`.
const KLINE_DAILY_COLS: &[&str] = &[
    "trade_date",
    "open",
    "close",
    "high",
    "low",
    "volume",
    "amount",
    "amplitude",
    "change_pct",
    "change",
    "turnover_rate",
];

/// 1-minute kline column order for `fields2=f51..f57`.
const KLINE_MINUTE_COLS: &[&str] = &["ts", "open", "close", "high", "low", "volume", "amount"];

pub struct EastmoneyFeed {
    client: Client,
}

impl EastmoneyFeed {
    pub fn new() -> SyncResult<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(TIMEOUT_SECS))
            .build()
            .map_err(|e| SyncError::ConfigError(format!("http client: {e}")))?;
        Ok(Self { client })
    }

    /// GET a JSON document, mapping transport and status failures onto the
    /// error taxonomy.
    async fn get_json(&self, url: &str, params: &[(&str, String)]) -> SyncResult<Value> {
        let resp = self.client.get(url).query(params).send().await?;
        let status = resp.status();
        if status.as_u16() == 429 {
            return Err(SyncError::RateLimited);
        }
        if status.is_server_error() {
            return Err(SyncError::UpstreamUnavailable(format!(
                "{url} returned {status}"
            )));
        }
        if !status.is_success() {
            return Err(SyncError::Unknown(format!("{url} returned {status}")));
        }
        resp.json::<Value>()
            .await
            .map_err(|e| SyncError::Unknown(format!("malformed body from {url}: {e}")))
    }

    /// Fetch one page of the screener (`clist`) endpoint and return its
    /// row objects.
    async fn clist_rows(
        &self,
        fs: &str,
        fields: &str,
        sort_fid: &str,
    ) -> SyncResult<Vec<Map<String, Value>>> {
        let params = [
            ("pn", "1".to_string()),
            ("pz", LIST_PAGE_SIZE.to_string()),
            ("po", "1".to_string()),
            ("np", "1".to_string()),
            ("fltt", "2".to_string()),
            ("fid", sort_fid.to_string()),
            ("fs", fs.to_string()),
            ("fields", fields.to_string()),
        ];
        let body = self
            .get_json(&format!("{PUSH2}/api/qt/clist/get"), &params)
            .await?;
        diff_rows(&body)
    }

    /// Fetch a kline payload for one security.
    async fn kline(
        &self,
        code: &str,
        klt: &str,
        beg: &str,
        end: &str,
        fields2: &str,
        cols: &'static [&'static str],
    ) -> SyncResult<DataFrame> {
        let params = [
            ("secid", secid(code)),
            ("klt", klt.to_string()),
            ("fqt", "1".to_string()),
            ("beg", beg.to_string()),
            ("end", end.to_string()),
            ("fields1", "f1,f2,f3,f4,f5,f6".to_string()),
            ("fields2", fields2.to_string()),
        ];
        let body = self
            .get_json(&format!("{PUSH2HIS}/api/qt/stock/kline/get"), &params)
            .await?;
        kline_frame(&body, cols)
    }

    /// Query a datacenter report and return its row objects.
    async fn datacenter_rows(
        &self,
        report_name: &str,
        filter: &str,
        sort_columns: &str,
    ) -> SyncResult<Vec<Map<String, Value>>> {
        let params = [
            ("reportName", report_name.to_string()),
            ("columns", "ALL".to_string()),
            ("filter", filter.to_string()),
            ("sortColumns", sort_columns.to_string()),
            ("sortTypes", "-1".to_string()),
            ("pageSize", "500".to_string()),
            ("pageNumber", "1".to_string()),
        ];
        let body = self
            .get_json(&format!("{DATACENTER}/api/data/v1/get"), &params)
            .await?;
        let rows = body
            .get("result")
            .and_then(|r| r.get("data"))
            .and_then(Value::as_array)
            .ok_or(SyncError::Empty)?;
        Ok(rows
            .iter()
            .filter_map(|r| r.as_object().cloned())
            .collect())
    }
}

#[async_trait]
impl MarketFeed for EastmoneyFeed {
    async fn symbol_list(&self) -> SyncResult<DataFrame> {
        let mut frames = Vec::new();
        for (fs, asset_type) in [(FS_STOCKS, "stock"), (FS_ETFS, "etf")] {
            let rows = match self.clist_rows(fs, "f12,f13,f14", "f12").await {
                Ok(rows) => rows,
                Err(SyncError::Empty) => continue,
                Err(e) => return Err(e),
            };
            let mut df = frame_from_rows(
                &rows,
                &[("f12", "code"), ("f14", "name")],
                &[("f13", "market_id")],
            )?;
            let markets: Vec<&str> = {
                let codes = df.column("code")?.str()?;
                let market_ids = df.column("market_id")?.f64()?;
                codes
                    .into_iter()
                    .zip(market_ids)
                    .map(|(code, market_id)| market_label(code.unwrap_or(""), market_id))
                    .collect()
            };
            df.with_column(Column::new("market".into(), markets))?;
            df.with_column(Column::new(
                "asset_type".into(),
                vec![asset_type; df.height()],
            ))?;
            let df = df.drop("market_id")?;
            frames.push(df);
        }
        let mut iter = frames.into_iter();
        let first = iter.next().ok_or(SyncError::Empty)?;
        iter.try_fold(first, |acc, df| {
            acc.vstack(&df).map_err(SyncError::from)
        })
    }

    async fn symbol_industry(&self) -> SyncResult<DataFrame> {
        let rows = self.clist_rows(FS_STOCKS, "f12,f100,f26", "f12").await?;
        let mut df = frame_from_rows(&rows, &[("f12", "code"), ("f100", "industry")], &[])?;
        // f26 is the listing date as a yyyyMMdd integer.
        let list_dates: Vec<Option<String>> = rows
            .iter()
            .map(|r| {
                r.get("f26")
                    .and_then(json_f64)
                    .map(|v| format_compact_date(v as i64))
            })
            .collect();
        df.with_column(Column::new("list_date".into(), list_dates))?;
        Ok(df)
    }

    async fn daily_bars(
        &self,
        code: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> SyncResult<DataFrame> {
        self.kline(
            code,
            "101",
            &start.format("%Y%m%d").to_string(),
            &end.format("%Y%m%d").to_string(),
            "f51,f52,f53,f54,f55,f56,f57,f58,f59,f60,f61",
            KLINE_DAILY_COLS,
        )
        .await
    }

    async fn minute_bars(&self, code: &str) -> SyncResult<DataFrame> {
        self.kline(
            code,
            "1",
            "0",
            "20500101",
            "f51,f52,f53,f54,f55,f56,f57",
            KLINE_MINUTE_COLS,
        )
        .await
    }

    async fn realtime_quote(&self, code: &str) -> SyncResult<DataFrame> {
        let params = [
            ("secid", secid(code)),
            ("fltt", "2".to_string()),
            (
                "fields",
                "f43,f44,f45,f46,f47,f48,f57,f170".to_string(),
            ),
        ];
        let body = self
            .get_json(&format!("{PUSH2}/api/qt/stock/get"), &params)
            .await?;
        let data = body
            .get("data")
            .and_then(Value::as_object)
            .ok_or(SyncError::Empty)?;
        let row = vec![data.clone()];
        frame_from_rows(
            &row,
            &[("f57", "code")],
            &[
                ("f43", "price"),
                ("f44", "high"),
                ("f45", "low"),
                ("f46", "open"),
                ("f47", "volume"),
                ("f48", "amount"),
                ("f170", "change_pct"),
            ],
        )
    }

    async fn financials(&self, code: &str) -> SyncResult<DataFrame> {
        let rows = self
            .datacenter_rows(
                "RPT_LICO_FN_CPD",
                &format!("(SECURITY_CODE=\"{code}\")"),
                "REPORT_DATE",
            )
            .await?;
        let mut df = frame_from_rows(
            &rows,
            &[("REPORT_DATE", "end_date"), ("NOTICE_DATE", "pub_date")],
            &[
                ("TOTAL_OPERATE_INCOME", "revenue"),
                ("PARENT_NETPROFIT", "net_profit"),
                ("BASIC_EPS", "eps"),
                ("WEIGHTAVG_ROE", "roe"),
                ("XSMLL", "gross_margin"),
                ("ZCFZL", "debt_ratio"),
                ("MGJYXJJE", "ocf_per_share"),
            ],
        )?;
        // Datacenter dates arrive as "YYYY-MM-DD HH:MM:SS"; keep the date part.
        for col_name in ["end_date", "pub_date"] {
            let trimmed: Vec<Option<String>> = df
                .column(col_name)?
                .str()?
                .into_iter()
                .map(|v| v.map(|s| s.chars().take(10).collect()))
                .collect();
            df.with_column(Column::new(col_name.into(), trimmed))?;
        }
        Ok(df)
    }

    async fn valuation_snapshot(&self) -> SyncResult<DataFrame> {
        let rows = self
            .clist_rows(FS_STOCKS, "f12,f115,f23,f130,f20,f21,f133", "f12")
            .await?;
        frame_from_rows(
            &rows,
            &[("f12", "code")],
            &[
                ("f115", "pe_ttm"),
                ("f23", "pb"),
                ("f130", "ps_ttm"),
                ("f20", "total_mv"),
                ("f21", "circ_mv"),
                ("f133", "dividend_yield"),
            ],
        )
    }

    async fn fund_flow_rank(&self) -> SyncResult<DataFrame> {
        let rows = self
            .clist_rows(FS_STOCKS, "f12,f62,f66,f72,f78,f84", "f62")
            .await?;
        frame_from_rows(
            &rows,
            &[("f12", "code")],
            &[
                ("f62", "main_net"),
                ("f66", "super_net"),
                ("f72", "large_net"),
                ("f78", "medium_net"),
                ("f84", "small_net"),
            ],
        )
    }

    async fn margin_summary(&self, date: NaiveDate) -> SyncResult<DataFrame> {
        let rows = self
            .datacenter_rows(
                "RPTA_WEB_RZRQ_GGMX",
                &format!("(DATE='{}')", date.format("%Y-%m-%d")),
                "RZYE",
            )
            .await?;
        frame_from_rows(
            &rows,
            &[("SCODE", "code")],
            &[
                ("RZYE", "financing_balance"),
                ("RZMRE", "financing_buy"),
                ("RQYE", "securities_balance"),
            ],
        )
    }

    async fn dragon_tiger(&self, date: NaiveDate) -> SyncResult<DataFrame> {
        let rows = self
            .datacenter_rows(
                "RPT_DAILYBILLBOARD_DETAILSNEW",
                &format!("(TRADE_DATE='{}')", date.format("%Y-%m-%d")),
                "SECURITY_CODE",
            )
            .await?;
        frame_from_rows(
            &rows,
            &[("SECURITY_CODE", "code"), ("EXPLANATION", "reason")],
            &[
                ("BILLBOARD_NET_AMT", "net_buy"),
                ("BILLBOARD_BUY_AMT", "buy_amount"),
                ("BILLBOARD_SELL_AMT", "sell_amount"),
            ],
        )
    }

    async fn northbound_flow(&self) -> SyncResult<DataFrame> {
        let params = [
            ("fields1", "f1,f2,f3,f4".to_string()),
            ("fields2", "f51,f52,f53,f54".to_string()),
        ];
        let body = self
            .get_json(&format!("{PUSH2}/api/qt/kamt/get"), &params)
            .await?;
        let data = body
            .get("data")
            .and_then(Value::as_object)
            .ok_or(SyncError::Empty)?;

        let mut net = 0.0;
        let mut buy = 0.0;
        let mut sell = 0.0;
        for leg in ["hk2sh", "hk2sz"] {
            let leg_obj = data.get(leg).and_then(Value::as_object).ok_or_else(|| {
                SyncError::SchemaDrift(format!("northbound payload missing {leg}"))
            })?;
            net += leg_obj.get("netBuyAmt").and_then(json_f64).ok_or_else(|| {
                SyncError::SchemaDrift(format!("northbound {leg} missing netBuyAmt"))
            })?;
            buy += leg_obj.get("buyAmt").and_then(json_f64).unwrap_or(0.0);
            sell += leg_obj.get("sellAmt").and_then(json_f64).unwrap_or(0.0);
        }
        Ok(df! {
            "net_inflow" => &[net],
            "buy_amount" => &[buy],
            "sell_amount" => &[sell],
        }?)
    }

    async fn market_sentiment(&self, date: NaiveDate) -> SyncResult<DataFrame> {
        let params = [
            ("dpt", "wz.ztzt".to_string()),
            ("date", date.format("%Y%m%d").to_string()),
        ];
        let body = self
            .get_json(&format!("{PUSH2EX}/getTopicZDFenBu"), &params)
            .await?;
        let data = body
            .get("data")
            .and_then(Value::as_object)
            .ok_or(SyncError::Empty)?;
        let row = vec![data.clone()];
        frame_from_rows(
            &row,
            &[],
            &[
                ("up", "up_count"),
                ("down", "down_count"),
                ("ztCount", "limit_up_count"),
                ("dtCount", "limit_down_count"),
                ("cje", "turnover"),
            ],
        )
    }

    async fn limit_up_pool(&self, date: NaiveDate) -> SyncResult<DataFrame> {
        let params = [
            ("dpt", "wz.ztzt".to_string()),
            ("Pageindex", "0".to_string()),
            ("pagesize", "1000".to_string()),
            ("date", date.format("%Y%m%d").to_string()),
        ];
        let body = self
            .get_json(&format!("{PUSH2EX}/getTopicZTPool"), &params)
            .await?;
        let rows = body
            .get("data")
            .and_then(|d| d.get("pool"))
            .and_then(Value::as_array)
            .ok_or(SyncError::Empty)?;
        let rows: Vec<Map<String, Value>> = rows
            .iter()
            .filter_map(|r| r.as_object().cloned())
            .collect();
        frame_from_rows(
            &rows,
            &[("c", "code"), ("hybk", "reason")],
            &[("lbc", "streak"), ("fund", "seal_amount")],
        )
    }

    async fn sector_quotes(&self) -> SyncResult<DataFrame> {
        let mut frames = Vec::new();
        for (fs, kind) in [
            (FS_INDUSTRY_BOARDS, "industry"),
            (FS_CONCEPT_BOARDS, "concept"),
        ] {
            let rows = match self.clist_rows(fs, "f12,f14,f2,f3,f8,f140", "f3").await {
                Ok(rows) => rows,
                Err(SyncError::Empty) => continue,
                Err(e) => return Err(e),
            };
            let mut df = frame_from_rows(
                &rows,
                &[("f12", "sector_code"), ("f14", "name"), ("f140", "leader_code")],
                &[("f2", "close"), ("f3", "change_pct"), ("f8", "turnover")],
            )?;
            df.with_column(Column::new("kind".into(), vec![kind; df.height()]))?;
            frames.push(df);
        }
        let mut iter = frames.into_iter();
        let first = iter.next().ok_or(SyncError::Empty)?;
        iter.try_fold(first, |acc, df| {
            acc.vstack(&df).map_err(SyncError::from)
        })
    }

    async fn news_since(&self, since: NaiveDateTime) -> SyncResult<DataFrame> {
        let params = [
            ("client", "web".to_string()),
            ("biz", "web_24h".to_string()),
            ("fastColumn", "102".to_string()),
            ("pageSize", "200".to_string()),
        ];
        let body = self
            .get_json(&format!("{NEWS_API}/comm/web/getFastNewsList"), &params)
            .await?;
        let rows = body
            .get("data")
            .and_then(|d| d.get("fastNewsList"))
            .and_then(Value::as_array)
            .ok_or(SyncError::Empty)?;
        let rows: Vec<Map<String, Value>> = rows
            .iter()
            .filter_map(|r| r.as_object().cloned())
            .collect();

        let mut df = frame_from_rows(
            &rows,
            &[
                ("code", "id"),
                ("title", "title"),
                ("summary", "body"),
                ("showTime", "publish_time"),
                ("url", "url"),
            ],
            &[],
        )?;
        // stockList carries the related securities as objects; flatten to a
        // comma-joined code list.
        let related: Vec<Option<String>> = rows
            .iter()
            .map(|r| {
                r.get("stockList").and_then(Value::as_array).map(|stocks| {
                    stocks
                        .iter()
                        .filter_map(|s| s.get("code").and_then(json_str))
                        .collect::<Vec<_>>()
                        .join(",")
                })
            })
            .collect();
        df.with_column(Column::new("related_symbols".into(), related))?;
        df.with_column(Column::new(
            "source".into(),
            vec!["eastmoney"; df.height()],
        ))?;

        // The fast-news endpoint has no time filter; drop anything at or
        // before the cursor here so callers only see new entries.
        let cutoff = since.format("%Y-%m-%d %H:%M:%S").to_string();
        let df = df
            .lazy()
            .filter(col("publish_time").gt(lit(cutoff)))
            .collect()?;
        if df.height() == 0 {
            return Err(SyncError::Empty);
        }
        Ok(df)
    }
}

// ---------------------------------------------------------------------------
// Payload helpers
// ---------------------------------------------------------------------------

/// Map a bare A-share code onto the push2 `secid` (market prefix + code).
fn secid(code: &str) -> String {
    let market = match code.chars().next() {
        Some('5' | '6' | '9') => 1,
        _ => 0,
    };
    format!("{market}.{code}")
}

fn market_label(code: &str, market_id: Option<f64>) -> &'static str {
    // Beijing listings share market id 0 with Shenzhen; the code prefix
    // disambiguates.
    if code.starts_with('4') || code.starts_with('8') {
        return "BJ";
    }
    match market_id {
        Some(id) if id as i64 == 1 => "SH",
        _ => "SZ",
    }
}

/// Extract `data.diff` rows from a screener payload. The endpoint answers
/// either an array or an index-keyed object depending on parameters.
fn diff_rows(body: &Value) -> SyncResult<Vec<Map<String, Value>>> {
    let diff = body
        .get("data")
        .and_then(|d| d.get("diff"))
        .ok_or(SyncError::Empty)?;
    let rows: Vec<Map<String, Value>> = match diff {
        Value::Array(items) => items
            .iter()
            .filter_map(|r| r.as_object().cloned())
            .collect(),
        Value::Object(map) => map
            .values()
            .filter_map(|r| r.as_object().cloned())
            .collect(),
        _ => {
            return Err(SyncError::SchemaDrift(
                "diff payload is neither array nor object".into(),
            ))
        }
    };
    if rows.is_empty() {
        return Err(SyncError::Empty);
    }
    Ok(rows)
}

/// Numeric JSON field: numbers pass through, numeric strings parse, the
/// upstream's `"-"` placeholder maps to null.
fn json_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn json_str(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Build a frame from row objects by naming-based lookup.
///
/// Every mapped source field must appear in at least one row; otherwise the
/// payload shape changed and `SchemaDrift` is raised. Fields present in the
/// payload but not mapped are logged at debug and dropped.
fn frame_from_rows(
    rows: &[Map<String, Value>],
    text: &[(&str, &str)],
    numeric: &[(&str, &str)],
) -> SyncResult<DataFrame> {
    for (src, _) in text.iter().chain(numeric.iter()) {
        if !rows.iter().any(|r| r.contains_key(*src)) {
            return Err(SyncError::SchemaDrift(format!(
                "required field {src} absent from payload"
            )));
        }
    }

    let mapped: std::collections::HashSet<&str> = text
        .iter()
        .chain(numeric.iter())
        .map(|(src, _)| *src)
        .collect();
    for key in rows.iter().flat_map(|r| r.keys()) {
        if !mapped.contains(key.as_str()) {
            tracing::debug!(field = %key, "ignoring unmapped upstream field");
        }
    }

    let mut columns: Vec<Column> = Vec::with_capacity(text.len() + numeric.len());
    for (src, dst) in text {
        let values: Vec<Option<String>> = rows
            .iter()
            .map(|r| r.get(*src).and_then(json_str))
            .collect();
        columns.push(Column::new((*dst).into(), values));
    }
    for (src, dst) in numeric {
        let values: Vec<Option<f64>> = rows
            .iter()
            .map(|r| r.get(*src).and_then(json_f64))
            .collect();
        columns.push(Column::new((*dst).into(), values));
    }
    DataFrame::new(rows.len(), columns).map_err(SyncError::from)
}

/// Split positional kline strings into named string columns.
fn kline_frame(body: &Value, cols: &'static [&'static str]) -> SyncResult<DataFrame> {
    let klines = body
        .get("data")
        .and_then(|d| d.get("klines"))
        .and_then(Value::as_array)
        .ok_or(SyncError::Empty)?;
    if klines.is_empty() {
        return Err(SyncError::Empty);
    }

    let mut split: Vec<Vec<Option<String>>> = vec![Vec::with_capacity(klines.len()); cols.len()];
    for line in klines {
        let Some(line) = line.as_str() else {
            return Err(SyncError::SchemaDrift("kline entry is not a string".into()));
        };
        let parts: Vec<&str> = line.split(',').collect();
        if parts.len() < cols.len() {
            return Err(SyncError::SchemaDrift(format!(
                "kline entry has {} fields, expected {}",
                parts.len(),
                cols.len()
            )));
        }
        for (i, bucket) in split.iter_mut().enumerate() {
            bucket.push(Some(parts[i].to_string()));
        }
    }

    let columns: Vec<Column> = cols
        .iter()
        .zip(split)
        .map(|(name, values)| Column::new((*name).into(), values))
        .collect();
    DataFrame::new(klines.len(), columns).map_err(SyncError::from)
}

/// yyyyMMdd integer → `YYYY-MM-DD`, e.g. `19910403` → `1991-04-03`.
fn format_compact_date(v: i64) -> String {
    format!("{:04}-{:02}-{:02}", v / 10_000, (v / 100) % 100, v % 100)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secid_prefixes_by_code_family() {
        assert_eq!(secid("600519"), "1.600519");
        assert_eq!(secid("510300"), "1.510300");
        assert_eq!(secid("000001"), "0.000001");
        assert_eq!(secid("300750"), "0.300750");
        assert_eq!(secid("830799"), "0.830799");
    }

    #[test]
    fn market_label_disambiguates_beijing() {
        assert_eq!(market_label("600519", Some(1.0)), "SH");
        assert_eq!(market_label("000001", Some(0.0)), "SZ");
        assert_eq!(market_label("830799", Some(0.0)), "BJ");
        assert_eq!(market_label("430047", Some(0.0)), "BJ");
    }

    #[test]
    fn json_f64_handles_placeholder_dash() {
        assert_eq!(json_f64(&serde_json::json!(3.5)), Some(3.5));
        assert_eq!(json_f64(&serde_json::json!("3.5")), Some(3.5));
        assert_eq!(json_f64(&serde_json::json!("-")), None);
        assert_eq!(json_f64(&serde_json::json!(null)), None);
    }

    #[test]
    fn frame_from_rows_flags_missing_required_field() {
        let rows: Vec<Map<String, Value>> = vec![serde_json::from_value(
            serde_json::json!({"f12": "000001", "f14": "平安银行"}),
        )
        .unwrap()];
        let err = frame_from_rows(&rows, &[("f12", "code")], &[("f3", "change_pct")]).unwrap_err();
        assert_eq!(err.kind(), "SchemaDrift");

        let ok = frame_from_rows(&rows, &[("f12", "code"), ("f14", "name")], &[]).unwrap();
        assert_eq!(ok.height(), 1);
        assert_eq!(ok.column("code").unwrap().str().unwrap().get(0), Some("000001"));
    }

    #[test]
    fn kline_frame_splits_positional_fields() {
        let body = serde_json::json!({
            "data": {
                "klines": [
                    "2024-01-15,10.00,10.20,10.50,9.80,123456,1234567.0,7.1,2.0,0.20,1.2",
                    "2024-01-16,10.20,10.40,10.60,10.10,111111,1111111.0,4.9,2.0,0.20,1.1"
                ]
            }
        });
        let df = kline_frame(&body, KLINE_DAILY_COLS).unwrap();
        assert_eq!(df.height(), 2);
        assert_eq!(
            df.column("trade_date").unwrap().str().unwrap().get(0),
            Some("2024-01-15")
        );
        assert_eq!(df.column("close").unwrap().str().unwrap().get(1), Some("10.40"));
    }

    #[test]
    fn kline_frame_rejects_short_rows() {
        let body = serde_json::json!({ "data": { "klines": ["2024-01-15,10.0"] } });
        let err = kline_frame(&body, KLINE_DAILY_COLS).unwrap_err();
        assert_eq!(err.kind(), "SchemaDrift");
    }

    #[test]
    fn diff_rows_accepts_both_shapes() {
        let arr = serde_json::json!({"data": {"diff": [{"f12": "000001"}]}});
        assert_eq!(diff_rows(&arr).unwrap().len(), 1);

        let obj = serde_json::json!({"data": {"diff": {"0": {"f12": "000001"}}}});
        assert_eq!(diff_rows(&obj).unwrap().len(), 1);

        let empty = serde_json::json!({"data": null});
        assert_eq!(diff_rows(&empty).unwrap_err().kind(), "Empty");
    }

    #[test]
    fn compact_date_formats() {
        assert_eq!(format_compact_date(19_910_403), "1991-04-03");
        assert_eq!(format_compact_date(20_240_115), "2024-01-15");
    }
}
