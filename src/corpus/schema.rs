//! SQLite schema of the persisted corpus

/// Relational store: one row per abstract, keyed by PubMed id.
pub const ARTICLES_SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS articles (
    pmid INTEGER PRIMARY KEY,
    title TEXT,
    authors TEXT,
    abstract TEXT,
    publication_year INTEGER
);
"#;

/// Array store: one little-endian f32 blob per document, in corpus order.
pub const VECTORS_SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS doc_vectors (
    doc_id INTEGER NOT NULL,
    vector BLOB NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_doc_vectors_doc ON doc_vectors(doc_id);
"#;
