use crate::db::connection::DbPool;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS configuracoes (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  chave TEXT NOT NULL UNIQUE,
  valor TEXT,
  descricao TEXT,
  tipo TEXT NOT NULL CHECK(tipo IN ('string','integer','boolean','json')),
  categoria TEXT NOT NULL CHECK(categoria IN ('sistema','email','seguranca','integracao')),
  data_atualizacao TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS usuarios (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  nome_completo TEXT NOT NULL,
  email TEXT NOT NULL UNIQUE,
  username TEXT NOT NULL UNIQUE,
  senha_hash TEXT NOT NULL,
  salt TEXT NOT NULL,
  tipo TEXT NOT NULL DEFAULT 'cliente' CHECK(tipo IN ('admin','consultor','gestor','cliente')),
  status TEXT NOT NULL DEFAULT 'pendente' CHECK(status IN ('ativo','inativo','bloqueado','pendente')),
  ultimo_login TEXT,
  tentativas_login INTEGER NOT NULL DEFAULT 0,
  data_criacao TEXT NOT NULL,
  data_atualizacao TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS perfis_usuarios (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  usuario_id INTEGER NOT NULL REFERENCES usuarios(id),
  telefone TEXT,
  cargo TEXT,
  departamento TEXT,
  bio TEXT,
  preferencias TEXT,
  data_atualizacao TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS arquivos (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  nome TEXT NOT NULL,
  tipo TEXT NOT NULL,
  extensao TEXT NOT NULL,
  tamanho INTEGER NOT NULL,
  caminho TEXT NOT NULL,
  hash_conteudo TEXT,
  descricao TEXT,
  usuario_id INTEGER NOT NULL REFERENCES usuarios(id),
  publico INTEGER NOT NULL DEFAULT 0,
  data_upload TEXT NOT NULL,
  data_atualizacao TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS tarefas (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  titulo TEXT NOT NULL,
  descricao TEXT,
  classificacao TEXT NOT NULL CHECK(classificacao IN ('importancia','rotina','urgencia','pausa')),
  status TEXT NOT NULL DEFAULT 'pendente' CHECK(status IN ('pendente','em_andamento','concluida','cancelada','adiada')),
  prioridade TEXT NOT NULL DEFAULT 'media' CHECK(prioridade IN ('baixa','media','alta','critica')),
  data_criacao TEXT NOT NULL,
  data_atualizacao TEXT NOT NULL,
  data_inicio TEXT,
  data_prazo TEXT,
  data_conclusao TEXT,
  usuario_id INTEGER NOT NULL REFERENCES usuarios(id),
  responsavel_id INTEGER REFERENCES usuarios(id),
  concluida INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS subtarefas (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  titulo TEXT NOT NULL,
  descricao TEXT,
  status TEXT NOT NULL DEFAULT 'pendente' CHECK(status IN ('pendente','em_andamento','concluida','cancelada','adiada')),
  data_criacao TEXT NOT NULL,
  data_atualizacao TEXT NOT NULL,
  data_conclusao TEXT,
  tarefa_id INTEGER NOT NULL REFERENCES tarefas(id),
  concluida INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS comentarios_tarefas (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  conteudo TEXT NOT NULL,
  data_criacao TEXT NOT NULL,
  data_atualizacao TEXT NOT NULL,
  tarefa_id INTEGER NOT NULL REFERENCES tarefas(id),
  usuario_id INTEGER NOT NULL REFERENCES usuarios(id)
);

CREATE TABLE IF NOT EXISTS arquivos_tarefas (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  arquivo_id INTEGER NOT NULL REFERENCES arquivos(id),
  tarefa_id INTEGER NOT NULL REFERENCES tarefas(id),
  data_associacao TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS archives (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  name TEXT NOT NULL,
  description TEXT,
  storage_path TEXT,
  size_bytes INTEGER NOT NULL DEFAULT 0,
  kind TEXT NOT NULL CHECK(kind IN ('full','partial')),
  status TEXT NOT NULL CHECK(status IN ('succeeded','failed','in_progress')),
  created_at TEXT NOT NULL,
  created_by INTEGER
);

CREATE TABLE IF NOT EXISTS audit_log (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  category TEXT NOT NULL CHECK(category IN ('access','action','error','security')),
  severity TEXT NOT NULL CHECK(severity IN ('info','warning','error','critical')),
  message TEXT NOT NULL,
  actor_id INTEGER,
  created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_archives_created_at ON archives(created_at DESC);
CREATE INDEX IF NOT EXISTS idx_audit_log_created_at ON audit_log(created_at DESC);
CREATE INDEX IF NOT EXISTS idx_tarefas_usuario_id ON tarefas(usuario_id);
CREATE INDEX IF NOT EXISTS idx_arquivos_usuario_id ON arquivos(usuario_id);
"#;

pub fn migrate(pool: &DbPool) -> anyhow::Result<()> {
    tracing::info!("[DB] Starting database migration...");

    let conn = pool.get()?;
    conn.execute_batch(SCHEMA)?;

    // Idempotent migrations for databases created before the column existed
    let has_column = |table: &str, column: &str| -> anyhow::Result<bool> {
        let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
        let columns = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(columns.iter().any(|c| c == column))
    };

    if !has_column("arquivos", "descricao")? {
        conn.execute_batch("ALTER TABLE arquivos ADD COLUMN descricao TEXT")?;
    }
    if !has_column("archives", "created_by")? {
        conn.execute_batch("ALTER TABLE archives ADD COLUMN created_by INTEGER")?;
    }

    tracing::info!("[DB] Migration completed successfully");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connection::create_pool;

    #[test]
    fn test_migrate_is_idempotent() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let pool = create_pool(&temp.path().join("test.db"), 1)?;
        migrate(&pool)?;
        migrate(&pool)?;

        let conn = pool.get()?;
        let tables: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN ('usuarios','tarefas','archives','audit_log')",
            [],
            |row| row.get(0),
        )?;
        assert_eq!(tables, 4);
        Ok(())
    }
}
