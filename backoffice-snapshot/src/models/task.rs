use crate::utils::time;
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};

// ── Task ──

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    pub classification: String,
    pub status: String,
    pub priority: String,
    pub created_at: String,
    pub updated_at: String,
    pub starts_at: Option<String>,
    pub due_at: Option<String>,
    pub completed_at: Option<String>,
    pub owner_id: i64,
    pub assignee_id: Option<i64>,
    pub completed: bool,
}

pub struct CreateTaskData<'a> {
    pub title: &'a str,
    pub description: Option<&'a str>,
    pub classification: &'a str,
    pub priority: &'a str,
    pub due_at: Option<&'a str>,
    pub owner_id: i64,
    pub assignee_id: Option<i64>,
}

fn row_to_task(row: &Row) -> rusqlite::Result<Task> {
    Ok(Task {
        id: row.get("id")?,
        title: row.get("titulo")?,
        description: row.get("descricao")?,
        classification: row.get("classificacao")?,
        status: row.get("status")?,
        priority: row.get("prioridade")?,
        created_at: row.get("data_criacao")?,
        updated_at: row.get("data_atualizacao")?,
        starts_at: row.get("data_inicio")?,
        due_at: row.get("data_prazo")?,
        completed_at: row.get("data_conclusao")?,
        owner_id: row.get("usuario_id")?,
        assignee_id: row.get("responsavel_id")?,
        completed: row.get("concluida")?,
    })
}

pub fn find_all_tasks(conn: &Connection) -> anyhow::Result<Vec<Task>> {
    let mut stmt = conn.prepare("SELECT * FROM tarefas ORDER BY id")?;
    let rows = stmt.query_map([], row_to_task)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub fn find_task_by_id(conn: &Connection, id: i64) -> anyhow::Result<Option<Task>> {
    let mut stmt = conn.prepare("SELECT * FROM tarefas WHERE id = ?")?;
    let mut rows = stmt.query_map(params![id], row_to_task)?;
    Ok(rows.next().transpose()?)
}

pub fn create_task(conn: &Connection, data: &CreateTaskData) -> anyhow::Result<Task> {
    let now = time::now_rfc3339();
    conn.execute(
        "INSERT INTO tarefas (titulo, descricao, classificacao, prioridade, data_criacao, data_atualizacao, data_prazo, usuario_id, responsavel_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            data.title,
            data.description,
            data.classification,
            data.priority,
            now,
            now,
            data.due_at,
            data.owner_id,
            data.assignee_id,
        ],
    )?;
    let id = conn.last_insert_rowid();
    find_task_by_id(conn, id)?.ok_or_else(|| anyhow::anyhow!("Failed to retrieve created task"))
}

pub fn complete_task(conn: &Connection, id: i64) -> anyhow::Result<()> {
    let now = time::now_rfc3339();
    conn.execute(
        "UPDATE tarefas SET status = 'concluida', concluida = 1, data_conclusao = ?1, data_atualizacao = ?1 WHERE id = ?2",
        params![now, id],
    )?;
    Ok(())
}

// ── Subtask ──

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subtask {
    pub id: i64,
    pub title: String,
    pub status: String,
    pub task_id: i64,
    pub completed: bool,
}

fn row_to_subtask(row: &Row) -> rusqlite::Result<Subtask> {
    Ok(Subtask {
        id: row.get("id")?,
        title: row.get("titulo")?,
        status: row.get("status")?,
        task_id: row.get("tarefa_id")?,
        completed: row.get("concluida")?,
    })
}

pub fn find_all_subtasks(conn: &Connection) -> anyhow::Result<Vec<Subtask>> {
    let mut stmt = conn.prepare("SELECT * FROM subtarefas ORDER BY id")?;
    let rows = stmt.query_map([], row_to_subtask)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub fn create_subtask(conn: &Connection, task_id: i64, title: &str) -> anyhow::Result<i64> {
    let now = time::now_rfc3339();
    conn.execute(
        "INSERT INTO subtarefas (titulo, data_criacao, data_atualizacao, tarefa_id) VALUES (?1, ?2, ?2, ?3)",
        params![title, now, task_id],
    )?;
    Ok(conn.last_insert_rowid())
}

// ── Comment ──

pub fn create_comment(conn: &Connection, task_id: i64, author_id: i64, content: &str) -> anyhow::Result<i64> {
    let now = time::now_rfc3339();
    conn.execute(
        "INSERT INTO comentarios_tarefas (conteudo, data_criacao, data_atualizacao, tarefa_id, usuario_id)
         VALUES (?1, ?2, ?2, ?3, ?4)",
        params![content, now, task_id, author_id],
    )?;
    Ok(conn.last_insert_rowid())
}

// ── Task attachment ──

pub fn attach_file(conn: &Connection, task_id: i64, file_id: i64) -> anyhow::Result<i64> {
    conn.execute(
        "INSERT INTO arquivos_tarefas (arquivo_id, tarefa_id, data_associacao) VALUES (?1, ?2, ?3)",
        params![file_id, task_id, time::now_rfc3339()],
    )?;
    Ok(conn.last_insert_rowid())
}
