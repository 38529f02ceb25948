//! Embedded store schema.
//!
//! Composite primary keys match the data model exactly; time-keyed tables
//! put the date in the key and carry a covering index so range scans stay
//! on the partition of interest.

pub const SCHEMA_SQL: &str = r"
CREATE TABLE IF NOT EXISTS symbols (
    code        TEXT PRIMARY KEY,
    name        TEXT NOT NULL,
    market      TEXT NOT NULL CHECK (market IN ('SH','SZ','BJ')),
    asset_type  TEXT NOT NULL CHECK (asset_type IN ('stock','etf')),
    industry    TEXT,
    list_date   TEXT,
    active      INTEGER NOT NULL DEFAULT 1
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS daily_bars (
    code          TEXT NOT NULL,
    trade_date    TEXT NOT NULL,
    open          REAL NOT NULL,
    high          REAL NOT NULL,
    low           REAL NOT NULL,
    close         REAL NOT NULL,
    volume        INTEGER NOT NULL,
    amount        REAL NOT NULL,
    change        REAL,
    change_pct    REAL,
    turnover_rate REAL,
    updated_at    TEXT NOT NULL,
    PRIMARY KEY (code, trade_date)
) WITHOUT ROWID;
CREATE INDEX IF NOT EXISTS idx_daily_bars_date ON daily_bars(trade_date);

CREATE TABLE IF NOT EXISTS minute_bars (
    code   TEXT NOT NULL,
    ts     TEXT NOT NULL,
    open   REAL NOT NULL,
    high   REAL NOT NULL,
    low    REAL NOT NULL,
    close  REAL NOT NULL,
    volume INTEGER NOT NULL,
    amount REAL NOT NULL,
    PRIMARY KEY (code, ts)
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS financials (
    code          TEXT NOT NULL,
    end_date      TEXT NOT NULL,
    pub_date      TEXT NOT NULL,
    revenue       REAL,
    net_profit    REAL,
    eps           REAL,
    roe           REAL,
    gross_margin  REAL,
    debt_ratio    REAL,
    ocf_per_share REAL,
    PRIMARY KEY (code, end_date)
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS valuations (
    code           TEXT NOT NULL,
    trade_date     TEXT NOT NULL,
    pe_ttm         REAL,
    pb             REAL,
    ps_ttm         REAL,
    peg            REAL,
    total_mv       REAL,
    circ_mv        REAL,
    dividend_yield REAL,
    PRIMARY KEY (code, trade_date)
) WITHOUT ROWID;
CREATE INDEX IF NOT EXISTS idx_valuations_date ON valuations(trade_date);

CREATE TABLE IF NOT EXISTS tech_indicators (
    code        TEXT NOT NULL,
    trade_date  TEXT NOT NULL,
    ma5         REAL,
    ma10        REAL,
    ma20        REAL,
    ma60        REAL,
    macd_dif    REAL,
    macd_dea    REAL,
    macd_hist   REAL,
    rsi14       REAL,
    kdj_k       REAL,
    kdj_d       REAL,
    kdj_j       REAL,
    boll_upper  REAL,
    boll_mid    REAL,
    boll_lower  REAL,
    cci14       REAL,
    atr14       REAL,
    obv         REAL,
    computed_at TEXT NOT NULL,
    PRIMARY KEY (code, trade_date)
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS fund_flows (
    code       TEXT NOT NULL,
    trade_date TEXT NOT NULL,
    main_net   REAL,
    super_net  REAL,
    large_net  REAL,
    medium_net REAL,
    small_net  REAL,
    PRIMARY KEY (code, trade_date)
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS margins (
    code               TEXT NOT NULL,
    trade_date         TEXT NOT NULL,
    financing_balance  REAL,
    financing_buy      REAL,
    securities_balance REAL,
    PRIMARY KEY (code, trade_date)
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS dragon_tiger (
    code        TEXT NOT NULL,
    trade_date  TEXT NOT NULL,
    reason      TEXT NOT NULL,
    net_buy     REAL,
    buy_amount  REAL,
    sell_amount REAL,
    PRIMARY KEY (code, trade_date, reason)
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS northbound_flows (
    trade_date  TEXT PRIMARY KEY,
    net_inflow  REAL,
    buy_amount  REAL,
    sell_amount REAL
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS market_sentiments (
    trade_date       TEXT PRIMARY KEY,
    up_count         INTEGER,
    down_count       INTEGER,
    limit_up_count   INTEGER,
    limit_down_count INTEGER,
    turnover         REAL
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS limit_up_stocks (
    code        TEXT NOT NULL,
    trade_date  TEXT NOT NULL,
    reason      TEXT,
    streak      INTEGER,
    seal_amount REAL,
    PRIMARY KEY (code, trade_date)
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS sectors (
    code TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    kind TEXT NOT NULL CHECK (kind IN ('industry','concept'))
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS sector_quotes (
    sector_code TEXT NOT NULL,
    trade_date  TEXT NOT NULL,
    close       REAL,
    change_pct  REAL,
    turnover    REAL,
    leader_code TEXT,
    PRIMARY KEY (sector_code, trade_date)
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS news_articles (
    id              TEXT PRIMARY KEY,
    title           TEXT NOT NULL,
    body            TEXT,
    publish_time    TEXT NOT NULL,
    source          TEXT NOT NULL,
    url             TEXT,
    related_symbols TEXT,
    embedding       BLOB,
    UNIQUE (source, url)
);
CREATE INDEX IF NOT EXISTS idx_news_publish_time ON news_articles(publish_time);
CREATE INDEX IF NOT EXISTS idx_news_unembedded
    ON news_articles(publish_time) WHERE embedding IS NULL;

CREATE TABLE IF NOT EXISTS watchlist (
    code     TEXT PRIMARY KEY,
    added_at TEXT NOT NULL
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS sync_errors (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    task_name     TEXT NOT NULL,
    target_code   TEXT,
    error_kind    TEXT NOT NULL,
    message       TEXT NOT NULL,
    retry_count   INTEGER NOT NULL DEFAULT 0,
    last_retry_at TEXT,
    created_at    TEXT NOT NULL,
    resolved_at   TEXT
);
CREATE INDEX IF NOT EXISTS idx_sync_errors_open
    ON sync_errors(task_name, target_code) WHERE resolved_at IS NULL;

CREATE TABLE IF NOT EXISTS task_status (
    task_name       TEXT PRIMARY KEY,
    last_run_at     TEXT,
    last_success_at TEXT,
    last_outcome    TEXT,
    progress_pct    REAL,
    last_error      TEXT,
    next_run_at     TEXT
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS doctor_reports (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    generated_at TEXT NOT NULL,
    report       TEXT NOT NULL,
    passed       INTEGER NOT NULL
);
";
