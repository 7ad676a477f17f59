//! Static description of the entity families that make up a snapshot.
//!
//! The task graph is cyclic at the application level (users own tasks, tasks
//! point back at users as creator and responsible), so reload order is a fixed
//! table rather than something derived row by row. `FAMILY_ORDER` is the
//! forward (reload) order; clearing walks the same tables in reverse.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Integer,
    Text,
    /// Stored as 0/1, exported as a JSON boolean.
    Bool,
    /// Stored as RFC 3339 text, exported as an ISO-8601 string.
    Timestamp,
    /// Stored and exported as the value label.
    Enum(&'static [&'static str]),
}

#[derive(Debug, Clone, Copy)]
pub struct ForeignKey {
    pub table: &'static str,
}

#[derive(Debug, Clone, Copy)]
pub struct ColumnSpec {
    pub name: &'static str,
    pub kind: ColumnKind,
    pub nullable: bool,
    pub references: Option<ForeignKey>,
}

#[derive(Debug)]
pub struct TableSpec {
    pub table: &'static str,
    /// Base name of `data/<export_name>.json` inside an archive.
    pub export_name: &'static str,
    pub columns: &'static [ColumnSpec],
}

impl TableSpec {
    pub fn archive_path(&self) -> String {
        format!("data/{}.json", self.export_name)
    }

    pub fn column_list(&self) -> String {
        self.columns
            .iter()
            .map(|c| c.name)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityFamily {
    Configuration,
    Identity,
    FileMetadata,
    TaskTracker,
}

/// Forward dependency order. Each family only references families before it.
pub const FAMILY_ORDER: [EntityFamily; 4] = [
    EntityFamily::Configuration,
    EntityFamily::Identity,
    EntityFamily::FileMetadata,
    EntityFamily::TaskTracker,
];

impl EntityFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityFamily::Configuration => "configuration",
            EntityFamily::Identity => "identity",
            EntityFamily::FileMetadata => "file_metadata",
            EntityFamily::TaskTracker => "task_tracker",
        }
    }

    /// Tables of this family in forward order.
    pub fn tables(&self) -> &'static [TableSpec] {
        match self {
            EntityFamily::Configuration => &CONFIGURATION_TABLES,
            EntityFamily::Identity => &IDENTITY_TABLES,
            EntityFamily::FileMetadata => &FILE_METADATA_TABLES,
            EntityFamily::TaskTracker => &TASK_TRACKER_TABLES,
        }
    }
}

impl fmt::Display for EntityFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Every snapshot table in reload order.
pub fn reload_order() -> impl Iterator<Item = &'static TableSpec> {
    FAMILY_ORDER.iter().flat_map(|family| family.tables().iter())
}

/// Every snapshot table in clear order (dependents first).
pub fn clear_order() -> Vec<&'static TableSpec> {
    let mut tables: Vec<_> = reload_order().collect();
    tables.reverse();
    tables
}

pub fn find_table(table: &str) -> Option<&'static TableSpec> {
    reload_order().find(|spec| spec.table == table)
}

pub const CONFIG_TYPES: &[&str] = &["string", "integer", "boolean", "json"];
pub const CONFIG_CATEGORIES: &[&str] = &["sistema", "email", "seguranca", "integracao"];
pub const USER_TYPES: &[&str] = &["admin", "consultor", "gestor", "cliente"];
pub const USER_STATUSES: &[&str] = &["ativo", "inativo", "bloqueado", "pendente"];
pub const TASK_CLASSIFICATIONS: &[&str] = &["importancia", "rotina", "urgencia", "pausa"];
pub const TASK_STATUSES: &[&str] = &["pendente", "em_andamento", "concluida", "cancelada", "adiada"];
pub const TASK_PRIORITIES: &[&str] = &["baixa", "media", "alta", "critica"];

const fn col(name: &'static str, kind: ColumnKind) -> ColumnSpec {
    ColumnSpec { name, kind, nullable: false, references: None }
}

const fn opt(name: &'static str, kind: ColumnKind) -> ColumnSpec {
    ColumnSpec { name, kind, nullable: true, references: None }
}

const fn fk(name: &'static str, table: &'static str) -> ColumnSpec {
    ColumnSpec {
        name,
        kind: ColumnKind::Integer,
        nullable: false,
        references: Some(ForeignKey { table }),
    }
}

const fn opt_fk(name: &'static str, table: &'static str) -> ColumnSpec {
    ColumnSpec {
        name,
        kind: ColumnKind::Integer,
        nullable: true,
        references: Some(ForeignKey { table }),
    }
}

use ColumnKind::{Bool, Enum, Integer, Text, Timestamp};

static CONFIGURATION_TABLES: [TableSpec; 1] = [TableSpec {
    table: "configuracoes",
    export_name: "configuracoes",
    columns: &[
        col("id", Integer),
        col("chave", Text),
        opt("valor", Text),
        opt("descricao", Text),
        col("tipo", Enum(CONFIG_TYPES)),
        col("categoria", Enum(CONFIG_CATEGORIES)),
        col("data_atualizacao", Timestamp),
    ],
}];

static IDENTITY_TABLES: [TableSpec; 2] = [
    TableSpec {
        table: "usuarios",
        export_name: "usuarios",
        columns: &[
            col("id", Integer),
            col("nome_completo", Text),
            col("email", Text),
            col("username", Text),
            col("senha_hash", Text),
            col("salt", Text),
            col("tipo", Enum(USER_TYPES)),
            col("status", Enum(USER_STATUSES)),
            opt("ultimo_login", Timestamp),
            col("tentativas_login", Integer),
            col("data_criacao", Timestamp),
            col("data_atualizacao", Timestamp),
        ],
    },
    TableSpec {
        table: "perfis_usuarios",
        export_name: "perfis",
        columns: &[
            col("id", Integer),
            fk("usuario_id", "usuarios"),
            opt("telefone", Text),
            opt("cargo", Text),
            opt("departamento", Text),
            opt("bio", Text),
            opt("preferencias", Text),
            col("data_atualizacao", Timestamp),
        ],
    },
];

static FILE_METADATA_TABLES: [TableSpec; 1] = [TableSpec {
    table: "arquivos",
    export_name: "arquivos",
    columns: &[
        col("id", Integer),
        col("nome", Text),
        col("tipo", Text),
        col("extensao", Text),
        col("tamanho", Integer),
        col("caminho", Text),
        opt("hash_conteudo", Text),
        opt("descricao", Text),
        fk("usuario_id", "usuarios"),
        col("publico", Bool),
        col("data_upload", Timestamp),
        col("data_atualizacao", Timestamp),
    ],
}];

static TASK_TRACKER_TABLES: [TableSpec; 4] = [
    TableSpec {
        table: "tarefas",
        export_name: "tarefas",
        columns: &[
            col("id", Integer),
            col("titulo", Text),
            opt("descricao", Text),
            col("classificacao", Enum(TASK_CLASSIFICATIONS)),
            col("status", Enum(TASK_STATUSES)),
            col("prioridade", Enum(TASK_PRIORITIES)),
            col("data_criacao", Timestamp),
            col("data_atualizacao", Timestamp),
            opt("data_inicio", Timestamp),
            opt("data_prazo", Timestamp),
            opt("data_conclusao", Timestamp),
            fk("usuario_id", "usuarios"),
            opt_fk("responsavel_id", "usuarios"),
            col("concluida", Bool),
        ],
    },
    TableSpec {
        table: "subtarefas",
        export_name: "subtarefas",
        columns: &[
            col("id", Integer),
            col("titulo", Text),
            opt("descricao", Text),
            col("status", Enum(TASK_STATUSES)),
            col("data_criacao", Timestamp),
            col("data_atualizacao", Timestamp),
            opt("data_conclusao", Timestamp),
            fk("tarefa_id", "tarefas"),
            col("concluida", Bool),
        ],
    },
    TableSpec {
        table: "comentarios_tarefas",
        export_name: "comentarios",
        columns: &[
            col("id", Integer),
            col("conteudo", Text),
            col("data_criacao", Timestamp),
            col("data_atualizacao", Timestamp),
            fk("tarefa_id", "tarefas"),
            fk("usuario_id", "usuarios"),
        ],
    },
    TableSpec {
        table: "arquivos_tarefas",
        export_name: "arquivos_tarefas",
        columns: &[
            col("id", Integer),
            fk("arquivo_id", "arquivos"),
            fk("tarefa_id", "tarefas"),
            col("data_associacao", Timestamp),
        ],
    },
];
