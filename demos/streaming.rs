use firebolt_http::{Connection, ConnectionOptions};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let connection = Connection::from_env(ConnectionOptions::default())?;
    let mut cursor = connection.cursor()?;

    cursor
        .execute_stream("SELECT * FROM generate_series(1, 1000000)", ())
        .await?;

    let mut total = 0usize;
    loop {
        let batch = cursor.fetch_many(Some(10_000)).await?;
        if batch.is_empty() {
            break;
        }
        total += batch.len();
    }
    println!("read {total} rows, query id {:?}", cursor.query_id()?);

    cursor.close().await?;
    Ok(())
}
