#[cfg(windows)]
fn main() {
    use std::io;

    #[cfg(feature = "log")]
    colog::init();

    let running = monit::start(monit::Config::default()).unwrap();
    let controller = &running.controller;

    println!("{}", controller.status());
    for line in controller.surfaces() {
        println!("  {line}");
    }
    let bindings = controller.current_bindings();
    println!(
        "block with {}, unblock with {}; press Enter to quit",
        bindings.block, bindings.unblock
    );

    let changes = controller.subscribe();
    std::thread::spawn(move || {
        for change in changes {
            println!("{:?}", change);
        }
    });

    let mut line = String::new();
    let _ = io::stdin().read_line(&mut line);

    running.stop().unwrap();
}

#[cfg(not(windows))]
fn main() {
    eprintln!("monit drives the Windows display stack and only runs on Windows");
}
