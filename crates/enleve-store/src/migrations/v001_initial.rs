//! v001 -- Initial schema creation.
//!
//! Mirrors the hosted collections: `profiles`, `user_roles`, `atendimento`,
//! `preferenciacliente` and `n8n_chat_histories`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Broker profiles
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS profiles (
    id            TEXT PRIMARY KEY NOT NULL,   -- auth user UUID
    nome_completo TEXT NOT NULL,
    foto_url      TEXT,                        -- storage path inside the avatars bucket
    posicao_fila  INTEGER,                     -- 1 = next turn, NULL = outside the queue
    role          TEXT NOT NULL,               -- admin | corretor
    created_at    TEXT NOT NULL,               -- RFC-3339
    updated_at    TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_profiles_queue ON profiles(posicao_fila);

-- ----------------------------------------------------------------
-- Role memberships
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS user_roles (
    user_id TEXT NOT NULL,
    role    TEXT NOT NULL,

    PRIMARY KEY (user_id, role)
);

-- ----------------------------------------------------------------
-- Attendances (leads)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS atendimento (
    id                      INTEGER PRIMARY KEY AUTOINCREMENT,
    canal                   TEXT NOT NULL,
    cliente_nome            TEXT NOT NULL,
    cliente_contato         TEXT NOT NULL,
    status                  TEXT NOT NULL,
    corretor_responsavel_id TEXT,              -- nullable FK -> profiles(id)
    timestamp_fila          TEXT,
    relatorio_ia            TEXT,
    session_id              TEXT,
    created_at              TEXT NOT NULL,
    updated_at              TEXT NOT NULL,

    FOREIGN KEY (corretor_responsavel_id) REFERENCES profiles(id) ON DELETE SET NULL
);

CREATE INDEX IF NOT EXISTS idx_atendimento_status ON atendimento(status);

-- ----------------------------------------------------------------
-- Client preferences
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS preferenciacliente (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    atendimento_id INTEGER NOT NULL,
    tipo           TEXT NOT NULL,
    valor_texto    TEXT,
    valor_numero   REAL,
    created_at     TEXT NOT NULL,

    FOREIGN KEY (atendimento_id) REFERENCES atendimento(id) ON DELETE CASCADE
);

-- ----------------------------------------------------------------
-- Chat histories of the automated assistant
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS n8n_chat_histories (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL,
    message    TEXT NOT NULL,                  -- JSON {"type": ..., "content": ...}
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_chat_session ON n8n_chat_histories(session_id, id);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
