use seqcompiler_backend::*;

fn main() {
    let mut timer = TickTimer::new();

    // The AOM needs real lead time before light is actually out; the
    // microwave switch is fast but not instant; the counter gate is TTL.
    let aom = Device::from_connector("ch0", "aom", 700.0, false);
    let mw = Device::from_connector("ch1", "mw_switch", 40.0, false);
    let gate = Device::from_connector("ch2", "counter_gate", 0.0, false);

    // One Rabi-style shot: polarize, wait, drive, read out, recover.
    let mut shot = Subset::new(49); // 50 passes
    shot.add_step(Step::new(3_000.0, vec![aom.clone()]).unwrap());
    shot.add_step(Step::new(1_000.0, vec![]).unwrap());
    shot.add_step(Step::new(350.0, vec![mw.clone()]).unwrap());
    shot.add_step(Step::new(3_000.0, vec![aom.clone(), gate.clone()]).unwrap());
    shot.add_step(Step::new(1_500.0, vec![]).unwrap());

    let mut seq = Sequence::new();
    seq.add_subset(&shot);
    timer.tick_print("assemble [ms]");

    // The aom's 700 ns lead reaches before t=0 on the first pass, so this
    // only compiles with wrap-around on.
    let program = seq
        .compile_program(true, true, Some(5_000.0), Some(4096))
        .unwrap();
    timer.tick_print("compile [ms]");

    let mut sink = TextSink::new(std::io::stdout());
    sink.load(&program, 500e6).unwrap();

    let timeline = seq.compile_timeline(true).unwrap();
    println!("{:?}", timeline.render(0, 8_850, 40));
}
