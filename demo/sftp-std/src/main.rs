use anyhow::{bail, Context, Result};
use argh::FromArgs;
use embedded_io_adapters::tokio_1::FromTokio;
use simplelog::*;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::spawn_local;

use sunset_sftp::{serve, SessionConfig, SftpClient, TransferOptions};

#[allow(unused_imports)]
use log::{debug, error, info, log, trace, warn};

mod fsserver;

use fsserver::FsServer;

#[derive(argh::FromArgs, Debug)]
/** Sunset SFTP demo. Speaks SFTP directly, without an SSH transport.
 */
struct Args {
    #[argh(switch, short = 'v')]
    /// verbose debug logging
    debug: bool,

    #[argh(switch)]
    /// more verbose
    trace: bool,

    #[argh(option)]
    /// peer SSH identification string, eg "SSH-2.0-OpenSSH_9.6"
    remote_ident: Option<String>,

    #[argh(subcommand)]
    cmd: Cmd,
}

#[derive(FromArgs, Debug)]
#[argh(subcommand)]
enum Cmd {
    Serve(ServeArgs),
    Ls(LsArgs),
    Get(GetArgs),
    Put(PutArgs),
}

#[derive(FromArgs, Debug)]
/// serve a directory, on stdin/stdout or a TCP port
#[argh(subcommand, name = "serve")]
struct ServeArgs {
    #[argh(option, short = 'l')]
    /// listen address, eg 127.0.0.1:2222. stdin/stdout otherwise
    listen: Option<String>,

    #[argh(positional, default = "String::from(\".\")")]
    /// directory to serve
    root: String,
}

#[derive(FromArgs, Debug)]
/// list a remote directory
#[argh(subcommand, name = "ls")]
struct LsArgs {
    #[argh(positional)]
    /// server address
    addr: String,

    #[argh(positional, default = "String::from(\".\")")]
    /// remote directory
    path: String,
}

#[derive(FromArgs, Debug)]
/// download a file
#[argh(subcommand, name = "get")]
struct GetArgs {
    #[argh(positional)]
    /// server address
    addr: String,

    #[argh(positional)]
    /// remote path
    remote: String,

    #[argh(positional)]
    /// local path
    local: String,

    #[argh(option, default = "64")]
    /// chunks in flight
    concurrency: usize,
}

#[derive(FromArgs, Debug)]
/// upload a file
#[argh(subcommand, name = "put")]
struct PutArgs {
    #[argh(positional)]
    /// server address
    addr: String,

    #[argh(positional)]
    /// local path
    local: String,

    #[argh(positional)]
    /// remote path
    remote: String,

    #[argh(option, default = "64")]
    /// chunks in flight
    concurrency: usize,

    #[argh(option)]
    /// octal permissions for the remote file
    mode: Option<String>,
}

#[tokio::main(flavor = "current_thread")]
async fn real_main() -> Result<()> {
    let args: Args = argh::from_env();
    setup_log(&args)?;

    // SftpClient isn't Send without the multi-thread feature
    let local = tokio::task::LocalSet::new();
    local.run_until(run(args)).await
}

fn main() {
    if let Err(e) = real_main() {
        error!("Exit with error: {e:#}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    trace!("args {args:?}");
    let config = SessionConfig { remote_ident: args.remote_ident.clone(), ..Default::default() };

    match args.cmd {
        Cmd::Serve(s) => run_server(s, config).await,
        Cmd::Ls(a) => {
            with_client(&a.addr, config, |c| async move {
                let path = c.realpath(&a.path).await?;
                for e in c.read_dir_all(&path).await? {
                    println!("{}", e.longname);
                }
                Ok(())
            })
            .await
        }
        Cmd::Get(a) => {
            with_client(&a.addr, config, |c| async move {
                let opts = TransferOptions { concurrency: a.concurrency, ..Default::default() };
                let n = c.fast_get(&a.remote, &a.local, opts).await?;
                info!("{n} bytes transferred");
                Ok(())
            })
            .await
        }
        Cmd::Put(a) => {
            let mode = match &a.mode {
                Some(m) => Some(u32::from_str_radix(m, 8).context("bad mode")?),
                None => None,
            };
            with_client(&a.addr, config, |c| async move {
                let opts = TransferOptions { concurrency: a.concurrency, mode, ..Default::default() };
                let n = c.fast_put(&a.local, &a.remote, opts).await?;
                info!("{n} bytes transferred");
                Ok(())
            })
            .await
        }
    }
}

async fn run_server(args: ServeArgs, config: SessionConfig) -> Result<()> {
    let Some(listen) = args.listen else {
        let mut server = FsServer::new(&args.root);
        let mut rsock = FromTokio::new(tokio::io::stdin());
        let mut wsock = FromTokio::new(tokio::io::stdout());
        serve(&mut server, config, &mut rsock, &mut wsock).await?;
        return Ok(());
    };

    let listener = TcpListener::bind(&listen).await.with_context(|| format!("binding {listen}"))?;
    info!("Listening on {listen}");
    loop {
        let (mut stream, peer) = listener.accept().await?;
        info!("Connection from {peer}");
        let root = args.root.clone();
        let config = config.clone();
        spawn_local(async move {
            let (rsock, wsock) = stream.split();
            let mut rsock = FromTokio::new(rsock);
            let mut wsock = FromTokio::new(wsock);
            let mut server = FsServer::new(root);
            match serve(&mut server, config, &mut rsock, &mut wsock).await {
                Ok(()) => info!("{peer} finished"),
                Err(e) => warn!("{peer} ended: {e}"),
            }
        });
    }
}

/// Connects and runs `f` while the session is active
async fn with_client<F, Fut>(addr: &str, config: SessionConfig, f: F) -> Result<()>
where
    F: FnOnce(std::rc::Rc<SftpClient>) -> Fut,
    Fut: core::future::Future<Output = Result<()>>,
{
    let mut stream = TcpStream::connect(addr).await.with_context(|| format!("connecting {addr}"))?;
    let (rsock, wsock) = stream.split();
    let mut rsock = FromTokio::new(rsock);
    let mut wsock = FromTokio::new(wsock);

    let client = std::rc::Rc::new(SftpClient::new(config));

    let run = async {
        let r = client.run(&mut rsock, &mut wsock).await;
        trace!("sftp run finished {r:?}");
        r
    };
    let session = async {
        client.ready().await?;
        debug!("server version {:?}", client.server_version().await);
        let r = f(client.clone()).await;
        client.close_session().await;
        r
    };

    let (res_run, res_session) = tokio::join!(run, session);
    debug!("res_run {res_run:?}");
    res_session?;
    if let Err(e) = res_run {
        bail!("session failed: {e}")
    }
    Ok(())
}

fn setup_log(args: &Args) -> Result<()> {
    let mut conf = simplelog::ConfigBuilder::new();
    let conf = conf.add_filter_allow_str("sunset").build();

    let level = if args.trace {
        LevelFilter::Trace
    } else if args.debug {
        LevelFilter::Debug
    } else {
        LevelFilter::Warn
    };

    // stdout may carry the session
    TermLogger::init(level, conf, TerminalMode::Stderr, ColorChoice::Auto)
        .context("logger setup")?;
    Ok(())
}
