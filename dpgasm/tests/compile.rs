use dpgasm::{compile, Options};

#[test]
fn end_to_end_self_loop() {
    let source = "flowchart TD\n\
         %%control block for settings of DPG\n\
         control[clock 100mhz auto\n\
         ivars 5\n\
         ]\n\
         seq1[ #single\n\
         10ns chan 0\n\
         ]\n\
         seq1-->seq1\n";
    let artifact = compile(source, "example1.txt", &Options::default()).unwrap();
    assert!(artifact.warnings.is_empty());

    let lines: Vec<&str> = artifact
        .text
        .lines()
        .filter(|l| !l.trim().is_empty())
        .collect();
    assert!(lines[0].starts_with("#This file was generated"));
    assert_eq!(lines[1], "config 13;");
    assert_eq!(lines[2], "writew 0,0,0,0,0,5,0,0,0;");
    assert_eq!(lines[3], "config 5;");
    assert_eq!(lines[4], "# Sequence Block: seq1 (single)");
    // one program row: channel 0 high for one timestep, jump to row 0
    assert_eq!(lines[5], "writew 1,0,0,0;\t# row 0");
    assert_eq!(lines[6], "config 0; #Release hold");
    assert_eq!(lines.len(), 7);
}

#[test]
fn trigger_loop_branch_program() {
    let source = "flowchart TD\n\
         control[clock 100mhz auto\n\
         ivars 3\n\
         evars 10\n\
         ]\n\
         seq1[ #idle\n\
         10ns chan 0\n\
         ]\n\
         trigger1[ #herald\n\
         extinput e1\n\
         count 10 in 1us\n\
         chan 4\n\
         success loop_check\n\
         failure loop_check\n\
         ]\n\
         subgraph loop1[ #collect\n\
         ivar 0 3 chan 2\n\
         ]\n\
         trigger1 --> |success| loop_check\n\
         end\n\
         branch1[ #gate\n\
         extinput e2\n\
         high seq1\n\
         low seq2\n\
         ]\n\
         seq2[ #flush\n\
         10ns chan 1\n\
         ]\n\
         seq1 --> loop1\n\
         loop1 --> branch1\n\
         branch1 --> seq2\n\
         seq2 --> seq1\n";
    let artifact = compile(source, "test.flow", &Options::default()).unwrap();

    let rows: Vec<&str> = artifact
        .text
        .lines()
        .filter(|l| l.contains("# row"))
        .collect();
    // seq1 (1) + loop control (4) + trigger body (5) + branch (1) + seq2 (1)
    assert_eq!(rows.len(), 12);

    // the loop body holds the trigger: load/dec at rows 1-2, trigger at 3-7,
    // check/exit at 8-9
    assert!(artifact.text.contains("# Loop Block: loop1 (collect)"));
    assert!(artifact.text.contains("# Trigger Block: trigger1 (herald)"));
    // both trigger exits land on the loop's check row (8)
    let check_row = rows.iter().find(|l| l.contains("row 6")).unwrap();
    assert!(check_row.contains("goto 8"), "unexpected: {check_row}");
    let success_row = rows.iter().find(|l| l.contains("row 7")).unwrap();
    assert!(success_row.contains("goto 8"), "unexpected: {success_row}");
    // `branch1 --> seq2` is followed by seq2's own edge and seq2 is the
    // branch's low target, so the branch check falls through in one word
    let branch_row = rows.iter().find(|l| l.contains("row 10")).unwrap();
    assert!(branch_row.contains("Branch on ext input 2"));
    // seq2 closes the cycle back to seq1 at row 0
    let last_row = rows.iter().find(|l| l.contains("row 11")).unwrap();
    assert!(last_row.starts_with("writew 2,0,0,0;"), "unexpected: {last_row}");
}

#[test]
fn hex_rendering() {
    let source = "control[ivars 0]\n\
         seq1[ 640ns chan 0-3 ]\n\
         seq1-->seq1\n";
    let artifact = compile(source, "t", &Options { hex: true, verbose: false }).unwrap();
    // channels 0-3 set, 64 timesteps, self loop: time stays decimal
    assert!(artifact.text.contains("writew 0x000f,0x0000,63,0x0000;\t# row 0"));
}

#[test]
fn oversized_step_warns_but_compiles() {
    let source = "control[ivars 0]\n\
         seq1[ 10ms chan 0 ]\n\
         seq1-->seq1\n";
    let artifact = compile(source, "t", &Options::default()).unwrap();
    assert_eq!(artifact.warnings.len(), 1);
    assert!(artifact.warnings[0].contains("Consider counter-based timing"));
    // 10 ms in 16 rows, the last one jumping back to row 0
    let rows: Vec<&str> = artifact
        .text
        .lines()
        .filter(|l| l.contains("# row"))
        .collect();
    assert_eq!(rows.len(), 16);
    // the 16th row carries the 169.6 us remainder and the loop-back jump
    assert!(rows[15].starts_with("writew 1,0,16959,0;"));
}

#[test]
fn syntax_error_reports_line() {
    let source = "control[ivars 0]\nseq1[ 10ns chan 0\n";
    let err = compile(source, "t", &Options::default()).unwrap_err();
    assert_eq!(
        err.to_string(),
        "Unterminated block `seq1` opened on line 2"
    );
}
