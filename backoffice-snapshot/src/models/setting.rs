use crate::utils::time;
use rusqlite::{params, Connection};
use std::collections::HashMap;

pub fn get(conn: &Connection, key: &str) -> anyhow::Result<Option<String>> {
    let mut stmt = conn.prepare("SELECT valor FROM configuracoes WHERE chave = ?")?;
    let mut rows = stmt.query_map(params![key], |row| row.get::<_, Option<String>>(0))?;
    Ok(rows.next().transpose()?.flatten())
}

pub fn set(conn: &Connection, key: &str, value: &str, value_type: &str, category: &str) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO configuracoes (chave, valor, tipo, categoria, data_atualizacao) VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(chave) DO UPDATE SET valor = excluded.valor, tipo = excluded.tipo,
           categoria = excluded.categoria, data_atualizacao = excluded.data_atualizacao",
        params![key, value, value_type, category, time::now_rfc3339()],
    )?;
    Ok(())
}

pub fn get_all(conn: &Connection) -> anyhow::Result<HashMap<String, Option<String>>> {
    let mut stmt = conn.prepare("SELECT chave, valor FROM configuracoes")?;
    let rows = stmt.query_map([], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?))
    })?;
    let mut map = HashMap::new();
    for r in rows {
        let (k, v) = r?;
        map.insert(k, v);
    }
    Ok(map)
}
