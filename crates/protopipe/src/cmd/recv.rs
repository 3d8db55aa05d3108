use protopipe_transport::{PipeConfig, PipeEndpoint};

use crate::cmd::{check_chunk, RecvArgs};
use crate::exit::{pipe_error, CliResult, SUCCESS};
use crate::output::{print_chunk, OutputFormat};

pub fn run(args: RecvArgs, format: OutputFormat) -> CliResult<i32> {
    let chunk = check_chunk(args.chunk)?;
    let endpoint = PipeEndpoint::create_with_config(PipeConfig::from_env())
        .map_err(|err| pipe_error("create failed", err))?;
    endpoint
        .listen(&args.name)
        .map_err(|err| pipe_error("listen failed", err))?;
    tracing::info!(pipe = %args.name, "waiting for peer");

    let mut buf = vec![0u8; chunk];
    let mut printed = 0usize;
    loop {
        let n = endpoint
            .read(&mut buf)
            .map_err(|err| pipe_error("receive failed", err))?;
        if n == 0 {
            tracing::debug!(pipe = %args.name, "peer closed");
            break;
        }

        print_chunk(&args.name, printed, &buf[..n], format);
        printed = printed.saturating_add(1);

        if let Some(count) = args.count {
            if printed >= count {
                break;
            }
        }
    }

    endpoint.close();
    Ok(SUCCESS)
}
