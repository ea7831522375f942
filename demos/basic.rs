use firebolt_http::{Connection, ConnectionOptions, ExecuteOptions, Params, Value};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let connection = Connection::from_env(ConnectionOptions::default())?;
    let mut cursor = connection.cursor()?;

    cursor
        .execute("CREATE TABLE IF NOT EXISTS users (id INT, name TEXT)")
        .await?;

    cursor
        .execute_many_with(
            "INSERT INTO users (id, name) VALUES (?, ?)",
            &[
                Params::positional([Value::int(1), Value::text("Kit")]),
                Params::positional([Value::int(2), Value::text("Ada")]),
            ],
            ExecuteOptions::new().bulk_insert(true),
        )
        .await?;

    cursor.execute("SET time_zone = 'UTC'").await?;
    cursor
        .execute_with(
            "SELECT id, name FROM users WHERE name = ?",
            [Value::text("Kit")],
            ExecuteOptions::default(),
        )
        .await?;

    for row in cursor.fetch_all().await? {
        println!("{row:?}");
    }
    if let Some(statistics) = cursor.statistics()? {
        println!("elapsed: {:.3}s", statistics.elapsed);
    }

    cursor.close().await?;
    connection.close();
    Ok(())
}
