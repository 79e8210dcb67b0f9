//! Rebinds the hotkeys from the command line, e.g. `block alt+f9`.

#[cfg(windows)]
fn main() {
    use std::io::{self, BufRead};

    use monit::hotkey::BindingKind;

    #[cfg(feature = "log")]
    colog::init();

    let running = monit::start(monit::Config::default()).unwrap();

    println!("type `block <combo>` or `unblock <combo>`, an empty line quits");
    for line in io::stdin().lock().lines() {
        let Ok(line) = line else { break };
        let Some((kind, combo)) = line.trim().split_once(' ') else {
            break;
        };
        let kind = match kind {
            "block" => BindingKind::Block,
            "unblock" => BindingKind::Unblock,
            other => {
                eprintln!("unknown binding `{other}`");
                continue;
            }
        };
        match running.controller.rebind(kind, combo) {
            Ok(combo) => println!("{kind} hotkey is now {combo}"),
            Err(e) => eprintln!("{e}"),
        }
    }

    running.stop().unwrap();
}

#[cfg(not(windows))]
fn main() {
    eprintln!("monit drives the Windows display stack and only runs on Windows");
}
