use anyhow::Result;
use clap::Args;
use common::StorageParameters;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};

#[derive(Args, Debug)]
pub struct Parameters {
    #[command(flatten)]
    storage: StorageParameters,
}

/// Reads one line, `None` when the input ends or an interrupt arrives first
async fn read_answer<R: AsyncBufRead + Unpin>(input: R) -> Result<Option<String>> {
    let mut lines = input.lines();
    tokio::select! {
        line = lines.next_line() => Ok(line?),
        _ = tokio::signal::ctrl_c() => Ok(None),
    }
}

fn confirmed(answer: Option<&str>) -> bool {
    answer.map(str::trim) == Some("yes")
}

pub async fn run(args: &Parameters) -> Result<()> {
    let repositories = common::storage::connect(&args.storage).await?;
    log::warn!("WILL DROP ALL DATA FROM THE STORAGE!");
    log::warn!("Are you sure you want to continue?");
    log::warn!("Type 'yes' to drop the data...");

    let answer = read_answer(BufReader::new(tokio::io::stdin())).await?;
    if !confirmed(answer.as_deref()) {
        log::info!("Dropping aborted");
        return Ok(());
    }
    log::info!("Dropping all data...");
    repositories.drop_all().await?;
    log::info!("Dropped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_yes_confirms() {
        assert!(confirmed(Some("yes")));
        assert!(confirmed(Some("yes\r")));
        assert!(!confirmed(Some("y")));
        assert!(!confirmed(Some("YES")));
        assert!(!confirmed(None));
    }

    #[tokio::test]
    async fn test_answer_is_first_line() {
        let answer = read_answer(&b"yes\nno\n"[..]).await.unwrap();
        assert_eq!(answer.as_deref(), Some("yes"));
        let nothing = read_answer(&b""[..]).await.unwrap();
        assert_eq!(nothing, None);
    }
}
