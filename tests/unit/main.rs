//! Unit test modules.

mod ftms_parser_test;
mod stream_codec_test;
mod training_load_test;
mod workout_plan_test;
