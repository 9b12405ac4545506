mod codec_props;
